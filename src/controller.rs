// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Wires link, supervisor, gateway and control server together.

use crossbeam_channel::{Receiver, Sender};
use log::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::BusDriver;
use crate::gateway::{CommandGateway, Outcome};
use crate::link::FieldBusLink;
use crate::logfile::CommandLog;
use crate::server::{Command, Request, Response, Server};
use crate::supervisor::{ConnectionSupervisor, CHECK_INTERVAL};
use crate::types::Result;

/// Builder for the controller.
///
/// ```no_run
/// # use fanctl::{ControllerBuilder, beckhoff::EL4001, sim::{SimBus, SimInterface, SimSlave}};
/// let bus = SimBus::new()
///     .interface(SimInterface::new("eth0").with_slave(SimSlave::new(EL4001, "EL4001")));
/// ControllerBuilder::new("fanctl")
///     .bind_addr("127.0.0.1:5020")
///     .command_log("logs/commands.csv")
///     .logging_cfg(None, false)
///     .build(Box::new(bus))
///     .unwrap()
///     .run();
/// ```
pub struct ControllerBuilder {
    name: String,
    bind_addr: Option<String>,
    command_log: Option<PathBuf>,
    log_dir: Option<String>,
    debug_logging: bool,
    settle_delay: Option<Duration>,
    check_interval: Duration,
}

impl ControllerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ControllerBuilder {
            name: name.into(),
            bind_addr: None,
            command_log: None,
            log_dir: None,
            debug_logging: false,
            settle_delay: None,
            check_interval: CHECK_INTERVAL,
        }
    }

    /// Address for the TCP control server.  Without one, no server is
    /// started and `run()` returns immediately.
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    pub fn command_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.command_log = Some(path.into());
        self
    }

    pub fn logging_cfg(mut self, log_dir: Option<String>, debug: bool) -> Self {
        self.log_dir = log_dir;
        self.debug_logging = debug;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn build(self, driver: Box<dyn BusDriver>) -> Result<Controller> {
        mlzlog::init(self.log_dir, &self.name, false, self.debug_logging, true)?;

        let mut link = FieldBusLink::new(driver);
        if let Some(delay) = self.settle_delay {
            link = link.settle_delay(delay);
        }
        let link = Arc::new(link);

        let log = CommandLog::new(
            self.command_log
                .unwrap_or_else(|| PathBuf::from("logs/commands.csv")),
        );
        let gateway = CommandGateway::new(Arc::clone(&link), log.clone());
        let supervisor = ConnectionSupervisor::new(Arc::clone(&link));

        let server = if let Some(addr) = self.bind_addr {
            let (server, r_req, w_resp) = Server::new();
            server.start(&addr)?;
            Some((r_req, w_resp))
        } else {
            None
        };

        supervisor.clone().spawn(self.check_interval);

        Ok(Controller {
            link,
            gateway,
            supervisor,
            log,
            server,
        })
    }
}

pub struct Controller {
    link: Arc<FieldBusLink>,
    gateway: CommandGateway,
    supervisor: ConnectionSupervisor,
    log: CommandLog,
    server: Option<(Receiver<Request>, Sender<Response>)>,
}

impl Controller {
    /// Serve control requests until the server goes away.
    pub fn run(mut self) {
        let (requests, responses) = match self.server.take() {
            Some(channels) => channels,
            None => return,
        };
        mlzlog::set_thread_prefix(String::from("controller: "));
        for req in requests {
            let resp = Response {
                hid: req.hid,
                lines: self.handle(req.cmd),
            };
            if responses.send(resp).is_err() {
                warn!("server went away, stopping");
                break;
            }
        }
    }

    fn handle(&self, cmd: Command) -> Vec<String> {
        match cmd {
            Command::Apply(kmh) => outcome_lines(self.gateway.apply_speed(kmh)),
            Command::Stop => outcome_lines(self.gateway.stop()),
            Command::Reconnect => {
                self.supervisor.check_and_recover();
                vec![format!("OK {}", self.link.status())]
            }
            Command::Status => vec![format!("OK {}", self.link.status())],
            Command::History(count) => match self.log.history() {
                Ok(records) => {
                    let skip = records.len().saturating_sub(count);
                    let mut lines = vec![format!("OK {} record(s)", records.len() - skip)];
                    lines.extend(
                        records
                            .into_iter()
                            .skip(skip)
                            .map(|r| format!("{};{:.2};{:.2}", r.timestamp, r.speed_kmh, r.voltage)),
                    );
                    lines
                }
                Err(e) => vec![format!("ERR could not read history: {}", e)],
            },
        }
    }
}

fn outcome_lines(outcome: Outcome) -> Vec<String> {
    vec![format!(
        "OK {} | {} | {}",
        outcome.speed_text, outcome.voltage_text, outcome.link_status
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beckhoff::EL4001;
    use crate::sim::{SimBus, SimInterface, SimSlave};

    fn rig(dir: &std::path::Path) -> Controller {
        let iface = SimInterface::new("sim0").with_slave(SimSlave::new(EL4001, "EL4001"));
        let link = Arc::new(
            FieldBusLink::new(Box::new(SimBus::new().interface(iface)))
                .settle_delay(Duration::from_millis(0)),
        );
        let log = CommandLog::new(dir.join("commands.csv"));
        Controller {
            gateway: CommandGateway::new(Arc::clone(&link), log.clone()),
            supervisor: ConnectionSupervisor::new(Arc::clone(&link)),
            link,
            log,
            server: None,
        }
    }

    #[test]
    fn speed_command_reports_all_three_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = rig(dir.path());
        ctl.handle(Command::Reconnect);

        let lines = ctl.handle(Command::Apply(5.0));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("OK Speed set: 5.00 km/h | Voltage sent: 5.00 V | "));
    }

    #[test]
    fn status_reflects_link_state() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = rig(dir.path());

        let before = ctl.handle(Command::Status);
        assert!(before[0].starts_with("OK "));

        ctl.handle(Command::Reconnect);
        let after = ctl.handle(Command::Status);
        assert!(after[0].contains("operational"));
    }

    #[test]
    fn history_returns_most_recent_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = rig(dir.path());
        ctl.handle(Command::Reconnect);
        for kmh in 0..5 {
            ctl.handle(Command::Apply(f64::from(kmh)));
        }

        let lines = ctl.handle(Command::History(2));
        assert_eq!(lines[0], "OK 2 record(s)");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(";3.00;"));
        assert!(lines[2].contains(";4.00;"));
    }

    #[test]
    fn stop_works_without_a_link() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = rig(dir.path());

        let lines = ctl.handle(Command::Stop);
        assert!(lines[0].contains("Fan stopped (0.00 km/h)"));
        assert!(lines[0].contains("delivery failed"));
        assert_eq!(ctl.log.history().unwrap().len(), 1);
    }
}
