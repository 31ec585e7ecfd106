// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Simulated bus backend.
//!
//! Implements [`BusDriver`]/[`BusMaster`] entirely in memory so the link
//! state machine can be exercised without a wired terminal.  Interfaces are
//! scripted: they can refuse to open, hold slaves that never pass a given
//! AL state, or start failing exchanges mid-run.  Tests use the handles to
//! inspect written output bytes and close/open counts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::bus::{BusDriver, BusMaster};
use crate::types::{AlState, BusInterface, Error, Result, SlaveId, SlaveInfo, SlavePos};

/// Output bytes owned by each simulated slave.
const SLAVE_OUTPUT_SIZE: usize = 2;

/// A scripted slave on a simulated interface.
#[derive(Debug, Clone)]
pub struct SimSlave {
    id: SlaveId,
    name: String,
    ceiling: AlState,
    state: AlState,
}

impl SimSlave {
    pub fn new(id: SlaveId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ceiling: AlState::Op,
            state: AlState::Init,
        }
    }

    /// The slave will never report a state beyond `ceiling`.
    pub fn stuck_at(mut self, ceiling: AlState) -> Self {
        self.ceiling = ceiling;
        self
    }
}

#[derive(Debug, Default)]
struct IfaceState {
    refuse_open: bool,
    exchange_fault: bool,
    slaves: Vec<SimSlave>,
    outputs: Vec<u8>,
    opens: u32,
    closes: u32,
}

/// One simulated network adapter.  Clones share state, so a test can keep a
/// handle while the driver side is owned by the link.
#[derive(Debug, Clone)]
pub struct SimInterface {
    name: String,
    shared: Arc<Mutex<IfaceState>>,
}

fn lock(shared: &Arc<Mutex<IfaceState>>) -> MutexGuard<IfaceState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Mutex::new(IfaceState::default())),
        }
    }

    pub fn with_slave(self, slave: SimSlave) -> Self {
        lock(&self.shared).slaves.push(slave);
        self
    }

    /// Opening a master on this interface will fail.
    pub fn refuse_open(self) -> Self {
        lock(&self.shared).refuse_open = true;
        self
    }

    /// Make every subsequent process-data exchange fail (or recover).
    pub fn set_exchange_fault(&self, fault: bool) {
        lock(&self.shared).exchange_fault = fault;
    }

    /// Knock all slaves back to SAFE-OP, as after a cable glitch.
    pub fn degrade(&self) {
        for slave in &mut lock(&self.shared).slaves {
            slave.state = AlState::SafeOp;
        }
    }

    /// The output image as last written by the master.
    pub fn written_output(&self) -> Vec<u8> {
        lock(&self.shared).outputs.clone()
    }

    pub fn opens(&self) -> u32 {
        lock(&self.shared).opens
    }

    pub fn closes(&self) -> u32 {
        lock(&self.shared).closes
    }
}

/// Simulated bus driver holding a fixed set of interfaces.
#[derive(Debug, Default)]
pub struct SimBus {
    ifaces: Vec<SimInterface>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interface(mut self, iface: SimInterface) -> Self {
        self.ifaces.push(iface);
        self
    }
}

impl BusDriver for SimBus {
    fn interfaces(&self) -> Result<Vec<BusInterface>> {
        Ok(self
            .ifaces
            .iter()
            .map(|i| BusInterface::new(i.name.clone()))
            .collect())
    }

    fn open(&self, iface: &BusInterface) -> Result<Box<dyn BusMaster>> {
        let sim = self
            .ifaces
            .iter()
            .find(|i| i.name == iface.name)
            .ok_or_else(|| Error::Bus(format!("unknown interface {}", iface)))?;
        let mut state = lock(&sim.shared);
        if state.refuse_open {
            return Err(Error::Bus(format!("could not open {}", iface)));
        }
        state.opens += 1;
        for slave in &mut state.slaves {
            slave.state = AlState::Init;
        }
        Ok(Box::new(SimMaster {
            shared: Arc::clone(&sim.shared),
            open: true,
        }))
    }
}

/// A master handle on one simulated interface.
struct SimMaster {
    shared: Arc<Mutex<IfaceState>>,
    open: bool,
}

impl SimMaster {
    fn state(&self) -> Result<MutexGuard<IfaceState>> {
        if !self.open {
            return Err(Error::Bus("master is closed".into()));
        }
        Ok(lock(&self.shared))
    }
}

impl BusMaster for SimMaster {
    fn init(&mut self) -> Result<usize> {
        let mut state = self.state()?;
        for slave in &mut state.slaves {
            slave.state = AlState::Init;
        }
        Ok(state.slaves.len())
    }

    fn config_dc(&mut self) -> Result<()> {
        self.state().map(|_| ())
    }

    fn slaves(&self) -> Vec<SlaveInfo> {
        lock(&self.shared)
            .slaves
            .iter()
            .enumerate()
            .map(|(pos, s)| SlaveInfo {
                pos: SlavePos::from(pos as u16),
                id: s.id,
                name: s.name.clone(),
                al_state: s.state,
            })
            .collect()
    }

    fn config_map(&mut self) -> Result<()> {
        let mut state = self.state()?;
        let size = state.slaves.len() * SLAVE_OUTPUT_SIZE;
        state.outputs = vec![0; size];
        Ok(())
    }

    fn request_state(&mut self, pos: SlavePos, want: AlState) -> Result<()> {
        let mut state = self.state()?;
        let slave = state
            .slaves
            .get_mut(usize::from(u16::from(pos)))
            .ok_or_else(|| Error::Bus(format!("no slave at position {}", pos)))?;
        // The device only climbs as far as its scripted ceiling allows.
        slave.state = want.min(slave.ceiling);
        Ok(())
    }

    fn check_state(&mut self, pos: SlavePos, want: AlState, timeout: Duration) -> Result<AlState> {
        let state = self.state()?;
        let slave = state
            .slaves
            .get(usize::from(u16::from(pos)))
            .ok_or_else(|| Error::Bus(format!("no slave at position {}", pos)))?;
        // A real master polls here; the simulation answers immediately.
        if slave.state >= want {
            Ok(slave.state)
        } else {
            Err(Error::StateTimeout {
                want,
                reached: slave.state,
                timeout,
            })
        }
    }

    fn slave_state(&self, pos: SlavePos) -> Result<AlState> {
        if !self.open {
            return Err(Error::Bus("master is closed".into()));
        }
        let state = lock(&self.shared);
        state
            .slaves
            .get(usize::from(u16::from(pos)))
            .map(|s| s.state)
            .ok_or_else(|| Error::Bus(format!("no slave at position {}", pos)))
    }

    fn is_operational(&self) -> bool {
        if !self.open {
            return false;
        }
        let state = lock(&self.shared);
        !state.slaves.is_empty() && state.slaves.iter().all(|s| s.state == AlState::Op)
    }

    fn write_outputs(&mut self, pos: SlavePos, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state()?;
        let base = usize::from(u16::from(pos)) * SLAVE_OUTPUT_SIZE + offset;
        if base + data.len() > state.outputs.len() {
            return Err(Error::Bus("write outside mapped output image".into()));
        }
        state.outputs[base..base + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn send_processdata(&mut self) -> Result<()> {
        let state = self.state()?;
        if state.exchange_fault {
            return Err(Error::Bus("simulated frame loss on send".into()));
        }
        Ok(())
    }

    fn receive_processdata(&mut self, _timeout: Duration) -> Result<u16> {
        let state = self.state()?;
        if state.exchange_fault {
            return Err(Error::Bus("simulated frame loss on receive".into()));
        }
        // Output-only slaves contribute 2 to the working counter.
        Ok(state.slaves.len() as u16 * 2)
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            lock(&self.shared).closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beckhoff::EL4001;

    #[test]
    fn full_bring_up_walk() {
        let iface = SimInterface::new("sim0").with_slave(SimSlave::new(EL4001, "EL4001"));
        let bus = SimBus::new().interface(iface.clone());

        let names = bus.interfaces().unwrap();
        assert_eq!(names.len(), 1);

        let mut master = bus.open(&names[0]).unwrap();
        assert_eq!(master.init().unwrap(), 1);
        master.config_dc().unwrap();
        let pos = master.slaves()[0].pos;
        master.config_map().unwrap();

        master.request_state(pos, AlState::SafeOp).unwrap();
        master
            .check_state(pos, AlState::SafeOp, Duration::from_millis(10))
            .unwrap();
        master.request_state(pos, AlState::Op).unwrap();
        master
            .check_state(pos, AlState::Op, Duration::from_millis(10))
            .unwrap();
        assert!(master.is_operational());

        master.write_outputs(pos, 0, &[0x34, 0x12]).unwrap();
        master.send_processdata().unwrap();
        assert_eq!(
            master.receive_processdata(Duration::from_millis(10)).unwrap(),
            2
        );
        assert_eq!(iface.written_output(), vec![0x34, 0x12]);

        master.close().unwrap();
        assert_eq!(iface.closes(), 1);
        assert!(!master.is_operational());
        assert!(master.send_processdata().is_err());
    }

    #[test]
    fn stuck_slave_times_out() {
        let iface = SimInterface::new("sim0")
            .with_slave(SimSlave::new(EL4001, "EL4001").stuck_at(AlState::SafeOp));
        let bus = SimBus::new().interface(iface);
        let names = bus.interfaces().unwrap();
        let mut master = bus.open(&names[0]).unwrap();
        master.init().unwrap();
        let pos = master.slaves()[0].pos;
        master.config_map().unwrap();

        master.request_state(pos, AlState::SafeOp).unwrap();
        master
            .check_state(pos, AlState::SafeOp, Duration::from_millis(10))
            .unwrap();
        master.request_state(pos, AlState::Op).unwrap();
        match master.check_state(pos, AlState::Op, Duration::from_millis(10)) {
            Err(Error::StateTimeout { want, reached, .. }) => {
                assert_eq!(want, AlState::Op);
                assert_eq!(reached, AlState::SafeOp);
            }
            other => panic!("expected state timeout, got {:?}", other.map(|_| ())),
        }
    }
}
