//! Fault records
//!
//! One record exists per unrecovered fault. It is created when a
//! power/line-fault notification (or a bus-drop detection) arrives,
//! carries the bounded rediscovery budget, and is destroyed when a
//! subsequent discovery succeeds.

use serde::Serialize;
use strand_types::{FaultEvent, FaultKind, NodeAddr};

/// Controller-owned record of an unrecovered fault.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    /// Faulting node (or the unknown sentinel).
    pub node: NodeAddr,
    /// Hardware classification.
    pub kind: FaultKind,
    /// A rediscovery attempt is queued.
    pub retry_pending: bool,
    /// Rediscovery attempts consumed.
    pub attempts: u32,
    /// Configured attempt budget.
    pub max_attempts: u32,
}

impl FaultRecord {
    /// Fresh record for `event` with the given retry budget.
    pub fn new(event: FaultEvent, max_attempts: u32) -> Self {
        Self {
            node: event.node,
            kind: event.kind,
            retry_pending: true,
            attempts: 0,
            max_attempts,
        }
    }

    /// Whether the retry budget is used up.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Consume one attempt (called when teardown for a retry begins).
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.retry_pending = false;
    }

    /// Snapshot for the status report.
    pub fn status(&self) -> FaultStatus {
        FaultStatus {
            node: self.node.to_string(),
            kind: self.kind.as_str().to_string(),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            retry_pending: self.retry_pending,
        }
    }
}

/// Serializable fault summary for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct FaultStatus {
    pub node: String,
    pub kind: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_pending: bool,
}
