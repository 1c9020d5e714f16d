//! Shared test fixtures: a scripted link driver with an external
//! control handle, so tests can inject outcomes, hardware events and
//! register values while the stack owns the driver box.
#![allow(dead_code)] // not every test target uses every fixture

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use strand_core::bus::link::{DiscoveryOutcome, LinkDriver, LinkEvent};
use strand_core::config::NodeDescriptor;
use strand_core::error::StrandResult;
use strand_types::{regs, NodeAddr};

#[derive(Default)]
struct DriverState {
    outcomes: VecDeque<DiscoveryOutcome>,
    delay_ticks: u32,
    active: Option<(DiscoveryOutcome, u32)>,
    events: VecDeque<LinkEvent>,
    registers: HashMap<(NodeAddr, u8), u8>,
    writes: Vec<(NodeAddr, u8, u8)>,
    runs: Vec<Vec<NodeDescriptor>>,
    resets: u32,
}

/// The driver half, owned by the stack.
pub struct ScriptedDriver {
    state: Arc<Mutex<DriverState>>,
}

/// The control half, kept by the test.
#[derive(Clone)]
pub struct DriverControl {
    state: Arc<Mutex<DriverState>>,
}

/// Build a scripted driver plus its control handle.
///
/// Without scripted outcomes, discovery succeeds after `delay` poll
/// ticks with the signatures derived from the requested topology.
pub fn scripted_driver() -> (ScriptedDriver, DriverControl) {
    let state = Arc::new(Mutex::new(DriverState {
        delay_ticks: 1,
        ..Default::default()
    }));
    (
        ScriptedDriver {
            state: Arc::clone(&state),
        },
        DriverControl { state },
    )
}

impl LinkDriver for ScriptedDriver {
    fn begin_discovery(&mut self, topology: &[NodeDescriptor]) -> StrandResult<()> {
        let mut state = self.state.lock();
        state.runs.push(topology.to_vec());
        let outcome = state.outcomes.pop_front().unwrap_or_else(|| {
            DiscoveryOutcome::Success {
                nodes: topology.iter().map(|d| d.signature()).collect(),
            }
        });
        let delay = state.delay_ticks;
        state.active = Some((outcome, delay));
        Ok(())
    }

    fn poll_discovery(&mut self) -> Option<DiscoveryOutcome> {
        let mut state = self.state.lock();
        match state.active.take() {
            Some((outcome, 0)) => Some(outcome),
            Some((outcome, remaining)) => {
                state.active = Some((outcome, remaining - 1));
                None
            }
            None => None,
        }
    }

    fn read_register(&mut self, node: NodeAddr, reg: u8) -> StrandResult<u8> {
        let state = self.state.lock();
        let value = state.registers.get(&(node, reg)).copied().unwrap_or({
            if reg == regs::IDENTITY {
                regs::IDENTITY_EXPECTED
            } else {
                0
            }
        });
        Ok(value)
    }

    fn write_register(&mut self, node: NodeAddr, reg: u8, value: u8) -> StrandResult<()> {
        let mut state = self.state.lock();
        state.writes.push((node, reg, value));
        state.registers.insert((node, reg), value);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.state.lock().events.pop_front()
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        state.resets += 1;
        state.events.clear();
        state.active = None;
    }
}

impl DriverControl {
    /// Script the outcome of the next discovery run.
    pub fn push_outcome(&self, outcome: DiscoveryOutcome) {
        self.state.lock().outcomes.push_back(outcome);
    }

    /// Inject a hardware event for the next tick.
    pub fn push_event(&self, event: LinkEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Override a register value.
    pub fn set_register(&self, node: NodeAddr, reg: u8, value: u8) {
        self.state.lock().registers.insert((node, reg), value);
    }

    /// Remove a register override.
    pub fn clear_register(&self, node: NodeAddr, reg: u8) {
        self.state.lock().registers.remove(&(node, reg));
    }

    /// Poll ticks before a discovery outcome becomes available.
    pub fn set_discovery_delay(&self, ticks: u32) {
        self.state.lock().delay_ticks = ticks;
    }

    /// Topologies of every discovery run so far.
    pub fn runs(&self) -> Vec<Vec<NodeDescriptor>> {
        self.state.lock().runs.clone()
    }

    /// Register writes observed so far.
    pub fn writes(&self) -> Vec<(NodeAddr, u8, u8)> {
        self.state.lock().writes.clone()
    }

    /// Driver resets observed so far.
    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }
}

/// Initialize test logging once.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A linear topology of `count` identical nodes.
pub fn topology(count: u8, vendor: u8) -> Vec<NodeDescriptor> {
    (0..count)
        .map(|addr| NodeDescriptor {
            addr,
            vendor,
            product: 0x28,
            version: 1,
        })
        .collect()
}
