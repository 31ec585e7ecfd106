// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Drives a ventilation fan over EtherCAT.
//!
//! A requested speed in km/h becomes an analog voltage on a Beckhoff
//! EL4001 output terminal.  The [`FieldBusLink`] owns the bus master and
//! its state machine, the [`ConnectionSupervisor`] keeps the link alive,
//! and the [`CommandGateway`] turns operator commands into voltages and
//! audit-log rows.  Bus access goes through the [`BusDriver`] seam, with
//! a simulated backend in [`sim`] for tests and demos.

pub mod beckhoff;
mod bus;
mod controller;
pub mod convert;
mod gateway;
mod link;
mod logfile;
mod server;
pub mod sim;
mod supervisor;
mod types;

pub use self::bus::{BusDriver, BusMaster};
pub use self::controller::{Controller, ControllerBuilder};
pub use self::gateway::{CommandGateway, Outcome};
pub use self::link::{FieldBusLink, RECV_TIMEOUT, SETTLE_DELAY, STATE_TIMEOUT, STATUS_OPERATIONAL};
pub use self::logfile::{CommandLog, LogRecord};
pub use self::server::Server;
pub use self::supervisor::{ConnectionSupervisor, CHECK_INTERVAL};
pub use self::types::*;
