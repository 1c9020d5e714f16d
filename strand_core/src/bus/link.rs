//! Physical-layer boundary
//!
//! Everything below the stack (the I2C transaction engine, the
//! transceiver registers, the discovery sequencer) sits behind
//! [`LinkDriver`]. The stack polls the driver from its tick loop;
//! the driver never calls back into the stack.

use crate::error::StrandResult;
use strand_types::{FaultEvent, InterruptEvent, NodeAddr, NodeSignature};

use crate::config::NodeDescriptor;

/// Result of one bus-wide discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// All nodes enumerated and configured; signatures in address order.
    Success { nodes: Vec<NodeSignature> },
    /// A node's identity did not authenticate against the active
    /// configuration.
    AuthFailure { node: NodeAddr },
    /// A line fault interrupted discovery.
    Fault(FaultEvent),
    /// Any other failure (I2C error, sequencer timeout, ...).
    Failed { reason: String },
}

/// Asynchronous hardware event polled from the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Classified interrupt attributed to a node.
    Interrupt(InterruptEvent),
    /// Power/line fault reported by the transceiver.
    Fault(FaultEvent),
}

/// The black-box physical layer consumed by the stack.
///
/// Implementations are expected to be non-blocking: `begin_discovery`
/// kicks the sequencer off and `poll_discovery` reports the outcome
/// once available. Scripted implementations for tests live with the
/// test suites.
pub trait LinkDriver: Send {
    /// Start enumerating the segment against `topology`.
    ///
    /// A second call while a run is active is a usage error and may
    /// fail; the stack guards against issuing one.
    fn begin_discovery(&mut self, topology: &[NodeDescriptor]) -> StrandResult<()>;

    /// The outcome of the active discovery run, once known.
    fn poll_discovery(&mut self) -> Option<DiscoveryOutcome>;

    /// Read a register on a node (master or slave).
    fn read_register(&mut self, node: NodeAddr, reg: u8) -> StrandResult<u8>;

    /// Write a register on a node (master or slave).
    fn write_register(&mut self, node: NodeAddr, reg: u8, value: u8) -> StrandResult<()>;

    /// Next pending hardware event, if any.
    fn poll_event(&mut self) -> Option<LinkEvent>;

    /// Drop all link state (called during segment teardown).
    ///
    /// Default does nothing; stateful drivers clear pending events and
    /// abort an active discovery run.
    fn reset(&mut self) {}
}
