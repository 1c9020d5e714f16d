//! Best-effort notification emitter
//!
//! Unsolicited events (a GPIO edge observed on a node) ride on pooled
//! payload items: each plugin slot owns a small fixed array of
//! [`NotifyPayload`] items. An item is acquired on the interrupt path,
//! referenced by exactly one outbound notification envelope, and
//! returned to the pool when the envelope is finalized. The envelope's
//! [`NotifyLease`] guard does the return, because the envelope's
//! lifetime belongs to the transport, not to the emitter.
//!
//! Delivery is best-effort end to end: with no free item, or a full
//! publish queue, the event is logged and dropped. The interrupt path
//! never fails loudly.

use crate::bus::message::Notification;
use crate::bus::stack::BusServices;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use strand_types::{NodeAddr, NotifyPayload};

/// Notification items per plugin slot.
pub const NOTIFY_ITEMS_PER_SLOT: usize = 8;

struct NotifyItem {
    in_use: bool,
    payload: NotifyPayload,
}

/// Fixed pool of notification payload items owned by one plugin slot.
pub struct NotifyPool {
    items: [NotifyItem; NOTIFY_ITEMS_PER_SLOT],
}

impl NotifyPool {
    pub fn new() -> Self {
        Self {
            items: std::array::from_fn(|_| NotifyItem {
                in_use: false,
                payload: NotifyPayload::default(),
            }),
        }
    }

    /// Claim the first free item for `payload`. `None` when all items
    /// are referenced by in-flight notifications.
    fn acquire(&mut self, payload: NotifyPayload) -> Option<usize> {
        for (index, item) in self.items.iter_mut().enumerate() {
            if !item.in_use {
                item.in_use = true;
                item.payload = payload;
                return Some(index);
            }
        }
        None
    }

    fn release(&mut self, index: usize) {
        if let Some(item) = self.items.get_mut(index) {
            item.in_use = false;
            item.payload = NotifyPayload::default();
        }
    }

    fn payload(&self, index: usize) -> NotifyPayload {
        self.items
            .get(index)
            .map(|item| item.payload)
            .unwrap_or_default()
    }

    /// Number of items currently referenced by in-flight notifications.
    pub fn in_use(&self) -> usize {
        self.items.iter().filter(|item| item.in_use).count()
    }
}

impl Default for NotifyPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a slot's notification pool.
///
/// The pool cell is shared between the owning plugin slot and the
/// leases riding on in-flight envelopes; both run on the stack's single
/// tick thread, the mutex only scopes the disjoint borrows.
pub type SharedNotifyPool = Arc<Mutex<NotifyPool>>;

/// Owning guard for one acquired notification item.
///
/// Dropping the lease, wherever the envelope is finalized, returns
/// the item to the pool. This is the release hook the transport-owned
/// message lifetime requires; the emitter never frees items itself.
pub struct NotifyLease {
    pool: SharedNotifyPool,
    index: usize,
}

impl NotifyLease {
    /// Acquire a free item from `pool`, or `None` on exhaustion.
    pub fn acquire(pool: &SharedNotifyPool, payload: NotifyPayload) -> Option<Self> {
        let index = pool.lock().acquire(payload)?;
        Some(Self {
            pool: Arc::clone(pool),
            index,
        })
    }

    /// Read the leased payload.
    pub fn payload(&self) -> NotifyPayload {
        self.pool.lock().payload(self.index)
    }
}

impl Drop for NotifyLease {
    fn drop(&mut self) {
        self.pool.lock().release(self.index);
    }
}

/// Publish a GPIO-class event from `source` as a best-effort
/// notification.
///
/// Every failure path (item exhaustion, rejected publish) releases the
/// item and logs; nothing propagates back to the interrupt caller.
pub fn emit(
    services: &mut BusServices,
    pool: &SharedNotifyPool,
    source: NodeAddr,
    payload: NotifyPayload,
) {
    let Some(lease) = NotifyLease::acquire(pool, payload) else {
        warn!("notification from {} dropped: item pool exhausted", source);
        services.note_notification_dropped(source);
        return;
    };
    let envelope = Notification::interrupt(source, lease);
    if !services.publish(envelope) {
        // the envelope (and with it the lease) was dropped by publish
        debug!("notification from {} dropped: publish queue full", source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> SharedNotifyPool {
        Arc::new(Mutex::new(NotifyPool::new()))
    }

    #[test]
    fn lease_returns_item_on_drop() {
        let pool = pool();
        {
            let lease = NotifyLease::acquire(&pool, NotifyPayload::gpio(3)).unwrap();
            assert_eq!(pool.lock().in_use(), 1);
            assert_eq!(lease.payload().param, 3);
        }
        assert_eq!(pool.lock().in_use(), 0);
    }

    #[test]
    fn exhaustion_yields_none_and_never_leaks() {
        let pool = pool();
        let leases: Vec<_> = (0..NOTIFY_ITEMS_PER_SLOT)
            .map(|pin| NotifyLease::acquire(&pool, NotifyPayload::gpio(pin as u8)).unwrap())
            .collect();
        assert_eq!(pool.lock().in_use(), NOTIFY_ITEMS_PER_SLOT);

        // any number of further acquisitions fail cleanly
        for _ in 0..100 {
            assert!(NotifyLease::acquire(&pool, NotifyPayload::gpio(0)).is_none());
        }

        drop(leases);
        assert_eq!(pool.lock().in_use(), 0);
        assert!(NotifyLease::acquire(&pool, NotifyPayload::gpio(0)).is_some());
    }

    #[test]
    fn payloads_are_per_item() {
        let pool = pool();
        let a = NotifyLease::acquire(&pool, NotifyPayload::gpio(1)).unwrap();
        let b = NotifyLease::acquire(&pool, NotifyPayload::gpio(2)).unwrap();
        assert_eq!(a.payload().param, 1);
        assert_eq!(b.payload().param, 2);
    }
}
