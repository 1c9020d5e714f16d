//! # STRAND Types - Core bus types with zero STRAND dependencies
//!
//! This is a leaf crate providing the canonical definitions of:
//! - [`NodeAddr`] - Bus node addressing (master, slave position, unknown)
//! - [`NodeSignature`] - Discovered node identity (address + vendor/product/version)
//! - [`FaultKind`] - The closed power/line-fault taxonomy
//! - [`Opcode`] / [`ResponseStatus`] - Request command codes and completion statuses
//! - [`InterruptKind`] / [`InterruptEvent`] - Classified hardware interrupt events
//! - [`NotifyPayload`] - Fixed-size notification payload carried by pooled items
//!
//! All other STRAND crates depend on this crate for these types,
//! eliminating duplication between the runtime and deployment tooling.

pub mod address;
pub mod fault;
pub mod wire;

pub use address::{NodeAddr, NodeSignature, MAX_SLAVE_NODES};
pub use fault::{FaultEvent, FaultKind};
pub use wire::{
    regs, InterruptEvent, InterruptKind, NotifyPayload, Opcode, ResponseStatus, NOTIFY_DATA_MAX,
};
