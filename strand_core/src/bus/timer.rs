//! Pooled deferred-timer service
//!
//! Plugins and the controller borrow timers from a fixed pool. A timer
//! is owned for the lifetime of whatever allocated it (a plugin slot's
//! deferred-completion timer, the controller's error-reset period) and
//! armed/cancelled as needed. Expirations are collected by the stack
//! tick loop and dispatched to the owner.

use crate::error::{StrandError, StrandResult};
use crate::plugin::slots::{SlotKey, SlotPool};
use crate::plugin::traits::PluginHandle;
use std::time::Duration;

/// Default timer pool capacity.
pub const DEFAULT_TIMER_CAPACITY: usize = 24;

/// Handle to one allocated timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) SlotKey);

/// Who receives a timer's expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOwner {
    /// A plugin slot; dispatched as `NodePlugin::timer_fired`.
    Binding {
        /// Index of the plugin in the stack registry.
        plugin: usize,
        /// Slot handle inside that plugin.
        handle: PluginHandle,
    },
    /// An external subscriber (the controller); dispatched through the
    /// callback registered with the stack.
    External,
}

struct TimerSlot {
    owner: TimerOwner,
    deadline_ns: Option<u64>,
    period_ns: Option<u64>,
}

/// Fixed pool of deferred timers.
pub struct TimerService {
    pool: SlotPool<TimerSlot>,
}

impl TimerService {
    /// Service with room for `capacity` timers.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: SlotPool::new(capacity),
        }
    }

    /// Allocate an idle timer for `owner`. `None` when the pool is
    /// exhausted (non-fatal; the caller logs and degrades).
    pub fn alloc(&mut self, owner: TimerOwner) -> Option<TimerHandle> {
        self.pool
            .allocate(TimerSlot {
                owner,
                deadline_ns: None,
                period_ns: None,
            })
            .map(TimerHandle)
    }

    /// Return a timer to the pool. Armed state is discarded.
    pub fn free(&mut self, handle: TimerHandle) -> StrandResult<()> {
        self.pool
            .release(handle.0)
            .map(|_| ())
            .ok_or_else(|| StrandError::invalid_handle(format!("timer {:?}", handle.0)))
    }

    /// Arm a one-shot expiration `delay` from `now_ns`.
    pub fn arm_oneshot(
        &mut self,
        handle: TimerHandle,
        now_ns: u64,
        delay: Duration,
    ) -> StrandResult<()> {
        let slot = self
            .pool
            .get_mut(handle.0)
            .ok_or_else(|| StrandError::invalid_handle(format!("timer {:?}", handle.0)))?;
        slot.deadline_ns = Some(now_ns + delay.as_nanos() as u64);
        slot.period_ns = None;
        Ok(())
    }

    /// Arm a periodic expiration every `period` starting from `now_ns`.
    pub fn arm_periodic(
        &mut self,
        handle: TimerHandle,
        now_ns: u64,
        period: Duration,
    ) -> StrandResult<()> {
        let period_ns = period.as_nanos() as u64;
        if period_ns == 0 {
            return Err(StrandError::invalid_input("periodic timer with zero period"));
        }
        let slot = self
            .pool
            .get_mut(handle.0)
            .ok_or_else(|| StrandError::invalid_handle(format!("timer {:?}", handle.0)))?;
        slot.deadline_ns = Some(now_ns + period_ns);
        slot.period_ns = Some(period_ns);
        Ok(())
    }

    /// Disarm without freeing. Idle timers cancel to a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> StrandResult<()> {
        let slot = self
            .pool
            .get_mut(handle.0)
            .ok_or_else(|| StrandError::invalid_handle(format!("timer {:?}", handle.0)))?;
        slot.deadline_ns = None;
        slot.period_ns = None;
        Ok(())
    }

    /// Whether the timer currently has a pending expiration.
    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.pool
            .get(handle.0)
            .map(|slot| slot.deadline_ns.is_some())
            .unwrap_or(false)
    }

    /// Number of allocated timers.
    pub fn in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Number of armed timers.
    pub fn armed(&self) -> usize {
        self.pool
            .iter()
            .filter(|(_, slot)| slot.deadline_ns.is_some())
            .count()
    }

    /// Collect every timer due at `now_ns`.
    ///
    /// One-shot timers disarm; periodic timers re-arm for the next
    /// period. At most one expiration per timer per call, so a slow
    /// tick cannot burst-fire a periodic timer.
    pub fn expire(&mut self, now_ns: u64) -> Vec<(TimerHandle, TimerOwner)> {
        let mut due = Vec::new();
        for (key, slot) in self.pool.iter_mut() {
            let Some(deadline) = slot.deadline_ns else {
                continue;
            };
            if deadline > now_ns {
                continue;
            }
            match slot.period_ns {
                Some(period) => slot.deadline_ns = Some(deadline + period),
                None => slot.deadline_ns = None,
            }
            due.push((TimerHandle(key), slot.owner));
        }
        due
    }
}
