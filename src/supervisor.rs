// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Periodic link health check and automatic recovery.

use crossbeam_channel::tick;
use log::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::link::{FieldBusLink, STATUS_OPERATIONAL};

/// Interval between periodic health checks.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(2000);

/// Watches the link and drives it back through bring-up when it has
/// dropped out of OPERATIONAL.
///
/// `check_and_recover` blocks for up to the bring-up timeouts, so it runs
/// on its own thread (see [`ConnectionSupervisor::spawn`]); the manual
/// reconnect path calls it directly.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    link: Arc<FieldBusLink>,
}

impl ConnectionSupervisor {
    pub fn new(link: Arc<FieldBusLink>) -> Self {
        Self { link }
    }

    /// One health check; attempts a fresh bring-up when unhealthy.
    pub fn check_and_recover(&self) {
        if self.link.healthy() {
            if !self.link.status().contains(STATUS_OPERATIONAL) {
                self.link
                    .set_status(format!("EtherCAT: {}.", STATUS_OPERATIONAL));
            }
            return;
        }

        info!("link unhealthy, attempting bring-up");
        match self.link.bring_up() {
            Ok(()) => {
                info!("link re-established");
                self.link
                    .set_status("EtherCAT: reconnected and operational.");
            }
            Err(e) => {
                warn!("bring-up failed: {}", e);
                let clock = time::strftime("%H:%M:%S", &time::now()).unwrap_or_default();
                self.link.set_status(format!(
                    "EtherCAT: disconnected, reconnect failed at {} ({}).",
                    clock, e
                ));
            }
        }
    }

    /// Run periodic checks on a background thread.
    pub fn spawn(self, interval: Duration) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            mlzlog::set_thread_prefix(String::from("supervisor: "));
            for _ in tick(interval) {
                self.check_and_recover();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beckhoff::EL4001;
    use crate::sim::{SimBus, SimInterface, SimSlave};
    use crate::types::LinkState;

    fn rig() -> (SimInterface, Arc<FieldBusLink>, ConnectionSupervisor) {
        let iface = SimInterface::new("sim0").with_slave(SimSlave::new(EL4001, "EL4001"));
        let link = Arc::new(
            FieldBusLink::new(Box::new(SimBus::new().interface(iface.clone())))
                .settle_delay(Duration::from_millis(0)),
        );
        let supervisor = ConnectionSupervisor::new(Arc::clone(&link));
        (iface, link, supervisor)
    }

    #[test]
    fn first_check_connects() {
        let (iface, link, supervisor) = rig();
        supervisor.check_and_recover();
        assert!(link.healthy());
        assert_eq!(iface.opens(), 1);
        assert!(link.status().contains("reconnected and operational"));
    }

    #[test]
    fn healthy_check_rewrites_stale_status() {
        let (_iface, link, supervisor) = rig();
        supervisor.check_and_recover();
        link.write_voltage(5.0).unwrap();
        assert!(link.status().contains("Last voltage: 5.00 V"));

        supervisor.check_and_recover();
        assert!(link.status().contains(STATUS_OPERATIONAL));
        // Idempotent from here on.
        let status = link.status();
        supervisor.check_and_recover();
        assert_eq!(link.status(), status);
    }

    #[test]
    fn recovers_after_bus_fault() {
        let (iface, link, supervisor) = rig();
        supervisor.check_and_recover();

        iface.set_exchange_fault(true);
        assert!(link.write_voltage(5.0).is_err());
        assert_eq!(link.state(), LinkState::Fault);

        iface.set_exchange_fault(false);
        supervisor.check_and_recover();
        assert!(link.healthy());
        // A fresh master was opened for the recovery.
        assert_eq!(iface.opens(), 2);
    }

    #[test]
    fn recovers_after_degraded_slave() {
        let (iface, link, supervisor) = rig();
        supervisor.check_and_recover();

        iface.degrade();
        assert!(!link.healthy());
        supervisor.check_and_recover();
        assert!(link.healthy());
    }

    #[test]
    fn failed_recovery_reports_timestamped_status() {
        let link = Arc::new(
            FieldBusLink::new(Box::new(SimBus::new())).settle_delay(Duration::from_millis(0)),
        );
        let supervisor = ConnectionSupervisor::new(Arc::clone(&link));
        supervisor.check_and_recover();
        assert!(link.status().contains("reconnect failed"));
    }
}
