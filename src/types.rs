// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use derive_new::new;
use std::{fmt, io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no network interfaces available for EtherCAT")]
    NoInterfaces,
    #[error("no interface yielded an operational output terminal")]
    NoWorkingInterface,
    #[error("slave did not reach {want} within {timeout:?}, stuck at {reached}")]
    StateTimeout {
        want: AlState,
        reached: AlState,
        timeout: Duration,
    },
    #[error("bus I/O error: {0}")]
    Bus(String),
    #[error("link is not operational")]
    NotReady,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A network adapter capable of raw EtherCAT frame I/O.
///
/// Only a name; the adapter itself is owned by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct BusInterface {
    pub name: String,
}

impl fmt::Display for BusInterface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An EtherCAT slave identification, consisting of vendor ID and product code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct SlaveId {
    pub vendor_id: u32,
    pub product_code: u32,
}

/// Position of a slave in the bus ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlavePos(u16);

impl From<u16> for SlavePos {
    fn from(pos: u16) -> Self {
        SlavePos(pos)
    }
}

impl From<SlavePos> for u16 {
    fn from(pos: SlavePos) -> Self {
        pos.0
    }
}

impl fmt::Display for SlavePos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// EtherCAT application-layer state of a slave.
///
/// A device passes INIT -> PRE-OP -> SAFE-OP -> OPERATIONAL during bring-up;
/// cyclic process data is only trusted in OPERATIONAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlState {
    Init = 1,
    PreOp = 2,
    SafeOp = 4,
    Op = 8,
}

impl fmt::Display for AlState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AlState::Init => "INIT",
            AlState::PreOp => "PRE-OP",
            AlState::SafeOp => "SAFE-OP",
            AlState::Op => "OPERATIONAL",
        })
    }
}

/// What is known about a discovered slave.
#[derive(Debug, Clone)]
pub struct SlaveInfo {
    pub pos: SlavePos,
    pub id: SlaveId,
    pub name: String,
    pub al_state: AlState,
}

/// Lifecycle state of the field-bus link as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    BringingUp,
    Operational,
    Fault,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::BringingUp => "BRINGING-UP",
            LinkState::Operational => "OPERATIONAL",
            LinkState::Fault => "FAULT",
        })
    }
}
