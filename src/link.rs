// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Ownership and lifecycle of the EtherCAT master/slave pair.
//!
//! [`FieldBusLink`] brings the bus up (interface discovery, INIT -> PRE-OP ->
//! SAFE-OP -> OPERATIONAL), performs the cyclic output write, and tears the
//! handles down on bus faults so the supervisor can recover on its next tick.
//! Every fault is absorbed here: callers see a state transition, an updated
//! status string and a tagged error, never a driver-level panic.

use log::*;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::beckhoff::{AO1_OUTPUT_OFFSET, EL4001};
use crate::bus::{BusDriver, BusMaster};
use crate::convert::{encode_output, voltage_to_raw, MAX_VOLTAGE};
use crate::types::{AlState, BusInterface, Error, LinkState, Result, SlavePos};

/// Timeout for the SAFE-OP and OPERATIONAL transition polls.
pub const STATE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout for receiving the inbound process-data frame.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait before the very first bring-up attempt; some adapters need time
/// after process start before raw-frame I/O works.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Marker phrase the supervisor checks before rewriting the status.
pub const STATUS_OPERATIONAL: &str = "connected and operational";

struct LinkInner {
    master: Option<Box<dyn BusMaster>>,
    slave: Option<SlavePos>,
    state: LinkState,
    status: String,
    settled: bool,
}

/// The field-bus link: one master handle, one matched slave, one lock.
///
/// `bring_up` and `write_voltage` serialize on the same mutex, so a write
/// never observes a half-initialized master and a bring-up in progress is
/// never interrupted by a concurrent write.
pub struct FieldBusLink {
    driver: Box<dyn BusDriver>,
    settle_delay: Duration,
    inner: Mutex<LinkInner>,
}

impl FieldBusLink {
    pub fn new(driver: Box<dyn BusDriver>) -> Self {
        Self {
            driver,
            settle_delay: SETTLE_DELAY,
            inner: Mutex::new(LinkInner {
                master: None,
                slave: None,
                state: LinkState::Disconnected,
                status: "EtherCAT: idle, awaiting first bring-up.".into(),
                settled: false,
            }),
        }
    }

    /// Override the one-time settle delay (tests pass zero).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current human-readable link status.
    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    /// Overwrite the link status (shared with the supervisor).
    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().status = status.into();
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    /// Whether master and slave both exist and both report OPERATIONAL.
    pub fn healthy(&self) -> bool {
        let inner = self.lock();
        let (master, pos) = match (&inner.master, inner.slave) {
            (Some(master), Some(pos)) => (master, pos),
            _ => return false,
        };
        master.is_operational()
            && master
                .slave_state(pos)
                .map(|s| s == AlState::Op)
                .unwrap_or(false)
    }

    /// Bring the bus up, trying every interface in enumeration order and
    /// committing the first master/slave pair that reaches OPERATIONAL.
    pub fn bring_up(&self) -> Result<()> {
        let mut inner = self.lock();
        self.bring_up_locked(&mut inner)
    }

    fn bring_up_locked(&self, inner: &mut LinkInner) -> Result<()> {
        if inner.master.is_some() {
            debug!("closing existing master before re-initialization");
            Self::teardown(inner);
        }
        inner.state = LinkState::BringingUp;

        if !inner.settled {
            info!(
                "waiting {:?} for adapters to settle before first bring-up",
                self.settle_delay
            );
            thread::sleep(self.settle_delay);
            inner.settled = true;
        }

        let ifaces = match self.driver.interfaces() {
            Ok(ifaces) => ifaces,
            Err(e) => {
                warn!("interface enumeration failed: {}", e);
                inner.state = LinkState::Fault;
                return Err(e);
            }
        };
        if ifaces.is_empty() {
            warn!("no network interfaces available");
            inner.state = LinkState::Fault;
            return Err(Error::NoInterfaces);
        }

        for iface in &ifaces {
            info!("attempting bring-up on interface {}", iface);
            match self.try_interface(iface) {
                Ok((master, pos)) => {
                    info!("EL4001 operational on interface {}", iface);
                    inner.master = Some(master);
                    inner.slave = Some(pos);
                    inner.state = LinkState::Operational;
                    inner.status = format!("EtherCAT: {}.", STATUS_OPERATIONAL);
                    return Ok(());
                }
                Err(e) => warn!("interface {} abandoned: {}", iface, e),
            }
        }

        warn!("no interface yielded an operational EL4001 terminal");
        inner.state = LinkState::Fault;
        Err(Error::NoWorkingInterface)
    }

    /// Open a master on one interface and walk the slave to OPERATIONAL.
    /// The master is closed again on every failure path.
    fn try_interface(&self, iface: &BusInterface) -> Result<(Box<dyn BusMaster>, SlavePos)> {
        let mut master = self.driver.open(iface)?;
        match Self::bring_up_master(master.as_mut()) {
            Ok(pos) => Ok((master, pos)),
            Err(e) => {
                if let Err(close_err) = master.close() {
                    warn!("error while closing abandoned master: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn bring_up_master(master: &mut dyn BusMaster) -> Result<SlavePos> {
        let count = master.init()?;
        debug!("bus initialized, {} slave(s) responding", count);
        master.config_dc()?;

        let slave = master
            .slaves()
            .into_iter()
            .find(|s| s.id == EL4001)
            .ok_or_else(|| {
                Error::Bus(format!(
                    "no terminal with vendor {:#010x} / product {:#09x} on this interface",
                    EL4001.vendor_id, EL4001.product_code
                ))
            })?;
        debug!("found {} at position {}", slave.name, slave.pos);

        master.config_map()?;
        master.request_state(slave.pos, AlState::SafeOp)?;
        master.check_state(slave.pos, AlState::SafeOp, STATE_TIMEOUT)?;
        debug!("slave reached SAFE-OP, requesting OPERATIONAL");
        master.request_state(slave.pos, AlState::Op)?;
        master.check_state(slave.pos, AlState::Op, STATE_TIMEOUT)?;
        Ok(slave.pos)
    }

    /// Deliver a voltage to the AO.1 output register and run one cyclic
    /// exchange.
    ///
    /// Returns [`Error::NotReady`] while the link is down (the supervisor
    /// will reconnect, the caller does not retry) and [`Error::Bus`] when
    /// the exchange itself fails, in which case the handles are torn down.
    pub fn write_voltage(&self, voltage: f64) -> Result<()> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let (master, pos) = match (inner.master.as_mut(), inner.slave) {
            (Some(master), Some(pos)) => (master, pos),
            _ => {
                debug!("write rejected: link not brought up");
                inner.status =
                    "EtherCAT: master/slave not initialized, awaiting reconnection.".into();
                return Err(Error::NotReady);
            }
        };

        let master_op = master.is_operational();
        let slave_op = master
            .slave_state(pos)
            .map(|s| s == AlState::Op)
            .unwrap_or(false);
        if !master_op || !slave_op {
            debug!(
                "write rejected: master operational: {}, slave operational: {}",
                master_op, slave_op
            );
            inner.status = format!(
                "EtherCAT: master {}, slave {}, retrying soon.",
                if master_op { "OK" } else { "NOK" },
                if slave_op { "OK" } else { "NOK" },
            );
            return Err(Error::NotReady);
        }

        let volts = voltage.max(0.0).min(MAX_VOLTAGE);
        let raw = voltage_to_raw(volts);
        let frame = encode_output(raw);

        match Self::cyclic_write(master.as_mut(), pos, &frame) {
            Ok(()) => {
                debug!("voltage {:.2} V written to AO.1 (raw {})", volts, raw);
                inner.status = format!("EtherCAT: OK. Last voltage: {:.2} V.", volts);
                Ok(())
            }
            Err(e) => {
                error!("bus I/O error during cyclic write: {}", e);
                Self::teardown(inner);
                inner.state = LinkState::Fault;
                inner.status = format!("EtherCAT: {}", e);
                Err(match e {
                    Error::Bus(msg) => Error::Bus(msg),
                    other => Error::Bus(other.to_string()),
                })
            }
        }
    }

    fn cyclic_write(master: &mut dyn BusMaster, pos: SlavePos, frame: &[u8]) -> Result<()> {
        master.write_outputs(pos, AO1_OUTPUT_OFFSET, frame)?;
        master.send_processdata()?;
        master.receive_processdata(RECV_TIMEOUT)?;
        Ok(())
    }

    /// Drop the handles, closing the master best-effort.  The next
    /// supervisor tick performs the recovery, not the failing caller.
    fn teardown(inner: &mut LinkInner) {
        if let Some(mut master) = inner.master.take() {
            if let Err(e) = master.close() {
                warn!("error while closing master: {}", e);
            }
        }
        inner.slave = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimInterface, SimSlave};
    use crate::types::SlaveId;
    use byteorder::{ByteOrder, LE};

    fn link(bus: SimBus) -> FieldBusLink {
        FieldBusLink::new(Box::new(bus)).settle_delay(Duration::from_millis(0))
    }

    fn el4001_iface(name: &str) -> SimInterface {
        SimInterface::new(name).with_slave(SimSlave::new(EL4001, "EL4001"))
    }

    #[test]
    fn write_without_bring_up_is_not_ready() {
        let iface = el4001_iface("sim0");
        let link = link(SimBus::new().interface(iface.clone()));

        match link.write_voltage(5.0) {
            Err(Error::NotReady) => {}
            other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
        }
        // No bus I/O happened.
        assert_eq!(iface.opens(), 0);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn bring_up_with_no_interfaces_fails() {
        let link = link(SimBus::new());
        match link.bring_up() {
            Err(Error::NoInterfaces) => {}
            other => panic!("expected NoInterfaces, got {:?}", other.map(|_| ())),
        }
        assert_eq!(link.state(), LinkState::Fault);
    }

    #[test]
    fn bring_up_without_matching_terminal_fails() {
        let stranger = SlaveId::new(0x0000_0002, 0x0444_2c52);
        let iface = SimInterface::new("sim0").with_slave(SimSlave::new(stranger, "EL1008"));
        let link = link(SimBus::new().interface(iface.clone()));

        match link.bring_up() {
            Err(Error::NoWorkingInterface) => {}
            other => panic!("expected NoWorkingInterface, got {:?}", other.map(|_| ())),
        }
        // The abandoned master was closed again.
        assert_eq!(iface.opens(), 1);
        assert_eq!(iface.closes(), 1);
        assert_eq!(link.state(), LinkState::Fault);
    }

    #[test]
    fn stuck_slave_abandons_interface() {
        let iface = SimInterface::new("sim0")
            .with_slave(SimSlave::new(EL4001, "EL4001").stuck_at(AlState::SafeOp));
        let link = link(SimBus::new().interface(iface.clone()));

        assert!(link.bring_up().is_err());
        assert_eq!(iface.closes(), 1);
        assert_eq!(link.state(), LinkState::Fault);
    }

    #[test]
    fn second_interface_wins_when_first_has_no_terminal() {
        let wifi = SimInterface::new("wlan0");
        let wired = el4001_iface("eth1");
        let link = link(
            SimBus::new()
                .interface(wifi.clone())
                .interface(wired.clone()),
        );

        link.bring_up().unwrap();
        assert_eq!(link.state(), LinkState::Operational);
        assert!(link.healthy());
        // The committed pair belongs to the second interface.
        assert_eq!(wifi.opens(), 1);
        assert_eq!(wifi.closes(), 1);
        assert_eq!(wired.opens(), 1);
        assert_eq!(wired.closes(), 0);

        link.write_voltage(10.0).unwrap();
        assert_eq!(LE::read_i16(&wired.written_output()), 32767);
    }

    #[test]
    fn first_working_interface_short_circuits() {
        let first = el4001_iface("eth0");
        let second = el4001_iface("eth1");
        let link = link(
            SimBus::new()
                .interface(first.clone())
                .interface(second.clone()),
        );

        link.bring_up().unwrap();
        assert_eq!(first.opens(), 1);
        assert_eq!(second.opens(), 0);
    }

    #[test]
    fn refused_interface_is_skipped() {
        let broken = el4001_iface("eth0").refuse_open();
        let good = el4001_iface("eth1");
        let link = link(
            SimBus::new()
                .interface(broken.clone())
                .interface(good.clone()),
        );

        link.bring_up().unwrap();
        assert_eq!(broken.opens(), 0);
        assert_eq!(good.opens(), 1);
    }

    #[test]
    fn bus_error_tears_down_handles() {
        let iface = el4001_iface("sim0");
        let link = link(SimBus::new().interface(iface.clone()));
        link.bring_up().unwrap();

        iface.set_exchange_fault(true);
        match link.write_voltage(5.0) {
            Err(Error::Bus(_)) => {}
            other => panic!("expected Bus error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(link.state(), LinkState::Fault);
        assert!(!link.healthy());
        assert_eq!(iface.closes(), 1);

        // The failing caller is not retried; a later bring-up recovers.
        iface.set_exchange_fault(false);
        match link.write_voltage(5.0) {
            Err(Error::NotReady) => {}
            other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
        }
        link.bring_up().unwrap();
        link.write_voltage(5.0).unwrap();
        assert_eq!(iface.opens(), 2);
    }

    #[test]
    fn voltage_is_clamped_and_quantized() {
        let iface = el4001_iface("sim0");
        let link = link(SimBus::new().interface(iface.clone()));
        link.bring_up().unwrap();

        link.write_voltage(25.0).unwrap();
        assert_eq!(LE::read_i16(&iface.written_output()), 32767);
        assert!(link.status().contains("10.00 V"));

        link.write_voltage(-3.0).unwrap();
        assert_eq!(LE::read_i16(&iface.written_output()), 0);
    }
}
