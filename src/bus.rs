// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The seam between the link state machine and an actual EtherCAT master.
//!
//! A [`BusDriver`] enumerates network interfaces and opens one master per
//! interface; a [`BusMaster`] exposes the subset of master operations the
//! bring-up sequence and the cyclic write need.  The simulated backend in
//! [`crate::sim`] implements both for tests and demo runs; a hardware master
//! (SOEM, IgH) plugs in behind the same traits.

use std::time::Duration;

use crate::types::{AlState, BusInterface, Result, SlaveInfo, SlavePos};

/// Access to the network adapters a master can be opened on.
pub trait BusDriver: Send + Sync {
    /// Enumerate adapters usable for raw EtherCAT frame I/O.
    fn interfaces(&self) -> Result<Vec<BusInterface>>;

    /// Open a master bound to the given adapter.
    ///
    /// At most one master per interface may be live; the caller closes the
    /// returned handle before opening another one.
    fn open(&self, iface: &BusInterface) -> Result<Box<dyn BusMaster>>;
}

/// An open EtherCAT master on one interface.
///
/// The handle owns the bus: dropping or closing it invalidates every slave
/// discovered under it.
pub trait BusMaster: Send {
    /// Initialize the bus and scan for slaves.  Returns the slave count.
    fn init(&mut self) -> Result<usize>;

    /// Enable distributed-clock configuration for the discovered slaves.
    fn config_dc(&mut self) -> Result<()>;

    /// The slaves discovered by [`BusMaster::init`].
    fn slaves(&self) -> Vec<SlaveInfo>;

    /// Map the process-data image; establishes the output byte ranges.
    fn config_map(&mut self) -> Result<()>;

    /// Request an application-layer state transition on one slave.
    fn request_state(&mut self, pos: SlavePos, state: AlState) -> Result<()>;

    /// Poll until the slave reports `want`, or fail with
    /// [`crate::Error::StateTimeout`] once `timeout` has elapsed.
    fn check_state(&mut self, pos: SlavePos, want: AlState, timeout: Duration) -> Result<AlState>;

    /// Current application-layer state of one slave.
    fn slave_state(&self, pos: SlavePos) -> Result<AlState>;

    /// Whether the master itself reports OPERATIONAL.
    fn is_operational(&self) -> bool;

    /// Write bytes into the output region of one slave's process image.
    fn write_outputs(&mut self, pos: SlavePos, offset: usize, data: &[u8]) -> Result<()>;

    /// Queue the outbound process-data frame.
    fn send_processdata(&mut self) -> Result<()>;

    /// Receive and acknowledge the inbound process-data frame.
    /// Returns the working counter.
    fn receive_processdata(&mut self, timeout: Duration) -> Result<u16>;

    /// Release the interface.  Slave handles under this master are invalid
    /// afterwards.
    fn close(&mut self) -> Result<()>;
}
