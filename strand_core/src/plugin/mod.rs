//! Node plugin layer
//!
//! The plugin contract every node handler satisfies, the slot arena
//! backing plugin instances, the best-effort notification emitter, and
//! the slave-node plugin itself.

pub mod notify;
pub mod slave;
pub mod slots;
pub mod traits;

pub use notify::{NotifyLease, NotifyPool, SharedNotifyPool, NOTIFY_ITEMS_PER_SLOT};
pub use slave::{SlavePlugin, SlavePluginConfig};
pub use slots::{SlotKey, SlotPool};
pub use traits::{Disposition, NodePlugin, PluginHandle};
