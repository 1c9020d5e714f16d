//! Node plugin contract
//!
//! Every node type on the bus is represented to the stack by a plugin
//! implementing this trait. The stack calls `open` for each discovered
//! node until some plugin claims it, then routes requests, interrupts
//! and timer expirations to the claimed (plugin, handle) binding.
//!
//! # The scheduling contract
//!
//! `execute` must never block: commands that model a slow peripheral
//! access arm the slot's deferred-completion timer and return
//! [`Disposition::Suspend`]; the stack re-enters the plugin through
//! `timer_fired` on expiry, and the plugin completes the parked request
//! through [`BusServices::complete_request`]. There is one in-flight
//! suspended request per slot (the mailbox); the stack rejects a second
//! send to a busy mailbox before the plugin ever sees it.
//!
//! # Example: claiming a node
//!
//! ```rust,ignore
//! impl NodePlugin for SensorPlugin {
//!     fn open(&mut self, services: &mut BusServices, sig: &NodeSignature) -> Option<PluginHandle> {
//!         if sig.addr.is_master() || sig.vendor != VENDOR_ID {
//!             return None;
//!         }
//!         self.slots.allocate(...).map(PluginHandle)
//!     }
//!     // ...
//! }
//! ```

use crate::bus::message::RequestMsg;
use crate::bus::stack::BusServices;
use crate::bus::timer::TimerHandle;
use crate::error::StrandResult;
use crate::plugin::slots::SlotKey;
use strand_types::{InterruptEvent, NodeSignature};

/// Handle to one claimed node slot inside a plugin.
///
/// Plugins mint handles by wrapping the [`SlotKey`] their slot pool
/// returned; the stack treats them as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub SlotKey);

/// What `execute` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The response is filled in; the request is done.
    Complete,
    /// Not processed yet — dispatch again on a later tick.
    Schedule,
    /// Parked in the slot mailbox; a timer expiry will complete it.
    Suspend,
}

/// Per-node-type handler satisfying the stack's plugin ABI.
pub trait NodePlugin: Send {
    /// The plugin's name (for logs and traces).
    ///
    /// Defaults to the implementing type's name.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        match full.rfind("::") {
            Some(pos) => &full[pos + 2..],
            None => full,
        }
    }

    /// Decide whether this plugin manages the node `sig` describes.
    ///
    /// Returns a slot handle on acceptance. `None` means "not mine" or
    /// "cannot take it" (slot or timer pool exhausted); the stack
    /// tries the next plugin or treats the node as unmanaged, both
    /// non-fatal.
    fn open(
        &mut self,
        services: &mut BusServices,
        sig: &NodeSignature,
    ) -> Option<PluginHandle>;

    /// Release a previously opened slot.
    ///
    /// Fails with `InvalidHandle` when `handle` does not resolve to an
    /// in-use slot (stale, foreign, or already closed).
    fn close(&mut self, services: &mut BusServices, handle: PluginHandle) -> StrandResult<()>;

    /// Process one request addressed to the bound node.
    fn execute(
        &mut self,
        services: &mut BusServices,
        msg: &mut RequestMsg,
        handle: PluginHandle,
    ) -> Disposition;

    /// Receive a classified hardware interrupt for the bound node.
    ///
    /// Must never fail loudly; irrelevant kinds are dropped.
    fn interrupt(
        &mut self,
        services: &mut BusServices,
        handle: PluginHandle,
        event: InterruptEvent,
    );

    /// A timer owned by `handle`'s slot expired.
    fn timer_fired(
        &mut self,
        services: &mut BusServices,
        handle: PluginHandle,
        timer: TimerHandle,
    );
}
