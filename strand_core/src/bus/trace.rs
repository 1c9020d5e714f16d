//! Bus sequence trace
//!
//! A bounded in-memory log of significant bus events (requests,
//! completions, notifications, controller state changes) for
//! post-mortem analysis. The controller starts it during bring-up and
//! stops it on teardown; when the buffer is full the oldest records
//! fall off.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strand_types::{FaultEvent, NodeAddr, NotifyPayload, Opcode, ResponseStatus};

/// Default trace capacity (records).
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

/// One traced bus event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A request entered the stack.
    RequestIssued {
        token: u64,
        target: NodeAddr,
        opcode: Opcode,
    },
    /// A request was parked in a slot mailbox.
    RequestSuspended { token: u64, target: NodeAddr },
    /// A request finished (including cancellations).
    RequestCompleted {
        token: u64,
        status: ResponseStatus,
        cancelled: bool,
    },
    /// A notification fanned out to subscribers.
    NotificationPublished { source: NodeAddr, payload: Option<NotifyPayload> },
    /// A notification was dropped before publish (pool exhausted).
    NotificationDropped { source: NodeAddr },
    /// Discovery started against a configuration.
    DiscoveryStarted { config: String },
    /// A fault was recorded by the controller.
    FaultRecorded(FaultEvent),
    /// Controller state transition.
    StateChange { from: String, to: String },
    /// Segment teardown began.
    Teardown,
}

/// A recorded event with its bus-clock timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Bus-clock time in nanoseconds.
    pub timestamp_ns: u64,
    /// The event.
    pub event: TraceEvent,
}

/// Circular event trace.
pub struct TraceLog {
    buffer: VecDeque<TraceRecord>,
    capacity: usize,
    enabled: bool,
    dropped: u64,
}

impl TraceLog {
    /// Trace with room for `capacity` records, initially stopped.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            enabled: false,
            dropped: 0,
        }
    }

    /// Begin recording.
    pub fn start(&mut self) {
        self.enabled = true;
    }

    /// Stop recording (records are kept for inspection).
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Whether the trace is currently recording.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a record, evicting the oldest when full.
    pub fn record(&mut self, timestamp_ns: u64, event: TraceEvent) {
        if !self.enabled {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
            self.dropped += 1;
        }
        self.buffer.push_back(TraceRecord {
            timestamp_ns,
            event,
        });
    }

    /// The recorded events, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &TraceRecord> {
        self.buffer.iter()
    }

    /// Number of records evicted due to capacity.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discard all records.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.dropped = 0;
    }

    /// Serialize the trace to a JSON array.
    pub fn to_json(&self) -> crate::error::StrandResult<String> {
        let records: Vec<&TraceRecord> = self.buffer.iter().collect();
        Ok(serde_json::to_string(&records)?)
    }
}
