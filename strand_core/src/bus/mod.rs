//! Bus transport runtime
//!
//! The stack side of the system: clock, pooled timers, envelopes, the
//! link-driver boundary, the sequence trace, and the tick-driven
//! orchestrator itself.

pub mod clock;
pub mod link;
pub mod message;
pub mod stack;
pub mod timer;
pub mod trace;

pub use clock::BusClock;
pub use link::{DiscoveryOutcome, LinkDriver, LinkEvent};
pub use message::{
    Completion, CompletionCallback, Notification, NotifyClass, RequestMsg, RequestToken, Response,
};
pub use stack::{BusServices, BusStack, StackConfig, StackStats, SubscriptionId};
pub use timer::{TimerHandle, TimerService, DEFAULT_TIMER_CAPACITY};
pub use trace::{TraceEvent, TraceLog, TraceRecord, DEFAULT_TRACE_CAPACITY};
