//! # STRAND Core
//!
//! The control runtime for a daisy-chained automotive digital-audio
//! bus segment. This crate provides the fundamental building blocks:
//!
//! - **Plugins**: Per-node handlers satisfying the open/close/execute/
//!   interrupt contract, scheduled cooperatively (never blocking)
//! - **Bus stack**: Request routing, pooled deferred timers, best-effort
//!   notifications, and the single tick loop that drives everything
//! - **Controller**: Bus-wide discovery with configuration fallback and
//!   bounded fault recovery (line faults, bus drops)
//! - **Tracing**: A bounded sequence log of bus events for post-mortem
//!   analysis
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use strand_core::{BusController, BusProfile, BusStack, SlavePlugin, StackConfig};
//!
//! let profile = BusProfile::from_file("segment.toml")?;
//! let mut stack = BusStack::new(Box::new(driver), StackConfig::default());
//! stack.register_plugin(Box::new(SlavePlugin::with_defaults()));
//!
//! let mut controller = BusController::new(profile, stack)?;
//! controller.start();
//! loop {
//!     controller.tick();
//! }
//! ```
//!
//! The physical layer (I2C transaction engine, transceiver registers,
//! discovery sequencer) sits behind the [`LinkDriver`] trait; the
//! scripted drivers used by the test suites show the expected
//! semantics.

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod plugin;

// Re-export commonly used types for easy access
pub use bus::{
    BusClock, BusServices, BusStack, Completion, DiscoveryOutcome, LinkDriver, LinkEvent,
    Notification, NotifyClass, RequestMsg, RequestToken, Response, StackConfig, StackStats,
    SubscriptionId, TimerHandle, TraceEvent, TraceLog,
};
pub use config::{BusProfile, NodeDescriptor, SegmentConfig};
pub use controller::{
    BusController, ControllerState, ControllerStatus, DiscoveryAttempt, FaultRecord,
};
pub use error::{StrandError, StrandResult};
pub use plugin::{Disposition, NodePlugin, PluginHandle, SlavePlugin, SlavePluginConfig};

// Re-export the shared type crate under a short path
pub use strand_types as types;
