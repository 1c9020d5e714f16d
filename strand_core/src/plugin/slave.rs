//! Slave-node plugin
//!
//! Handles every slave transceiver on the segment: answers status and
//! version reads synchronously, models peripheral-bound power commands
//! with a deferred-completion timer (`Suspend` → timer → complete), and
//! forwards GPIO interrupts to the notification emitter.
//!
//! Slots live in a fixed-capacity arena owned by the plugin instance;
//! there are no process globals, so independent plugin instances can
//! coexist (one per stack, many per test process).

use crate::bus::message::{RequestMsg, RequestToken, Response};
use crate::bus::stack::BusServices;
use crate::bus::timer::TimerHandle;
use crate::error::{StrandError, StrandResult};
use crate::plugin::notify::{self, NotifyPool, SharedNotifyPool};
use crate::plugin::slots::SlotPool;
use crate::plugin::traits::{Disposition, NodePlugin, PluginHandle};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use strand_types::{InterruptEvent, InterruptKind, NodeSignature, NotifyPayload, Opcode, ResponseStatus};

/// Slave plugin construction parameters.
#[derive(Debug, Clone)]
pub struct SlavePluginConfig {
    /// Maximum node instances this plugin can manage at once.
    pub capacity: usize,
    /// Accept only this vendor id (`None` accepts any).
    pub vendor: Option<u8>,
    /// Accept only this product id (`None` accepts any).
    pub product: Option<u8>,
    /// Modeled latency of one peripheral access (power up/down).
    pub peripheral_delay: Duration,
}

impl Default for SlavePluginConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            vendor: None,
            product: None,
            peripheral_delay: Duration::from_millis(25),
        }
    }
}

struct PendingOp {
    token: RequestToken,
    opcode: Opcode,
}

struct SlaveSlot {
    sig: NodeSignature,
    timer: Option<TimerHandle>,
    mailbox: Option<PendingOp>,
    power_on: bool,
    notify: SharedNotifyPool,
}

impl SlaveSlot {
    fn new(sig: NodeSignature) -> Self {
        Self {
            sig,
            timer: None,
            mailbox: None,
            power_on: false,
            notify: Arc::new(Mutex::new(NotifyPool::new())),
        }
    }

    fn status_byte(&self) -> u8 {
        // bit0: downstream peripheral powered, bit1: mailbox busy
        (self.power_on as u8) | ((self.mailbox.is_some() as u8) << 1)
    }
}

/// The per-slave-node plugin scheduler.
pub struct SlavePlugin {
    config: SlavePluginConfig,
    slots: SlotPool<SlaveSlot>,
}

impl SlavePlugin {
    /// Plugin with the given configuration.
    pub fn new(config: SlavePluginConfig) -> Self {
        let capacity = config.capacity;
        Self {
            config,
            slots: SlotPool::new(capacity),
        }
    }

    /// Plugin with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SlavePluginConfig::default())
    }

    fn accepts(&self, sig: &NodeSignature) -> bool {
        if let Some(vendor) = self.config.vendor {
            if sig.vendor != vendor {
                return false;
            }
        }
        if let Some(product) = self.config.product {
            if sig.product != product {
                return false;
            }
        }
        true
    }

    /// Number of slots currently claimed.
    pub fn open_slots(&self) -> usize {
        self.slots.in_use()
    }

    /// Cached power state of a bound node (for monitoring and tests).
    pub fn power_state(&self, handle: PluginHandle) -> Option<bool> {
        self.slots.get(handle.0).map(|slot| slot.power_on)
    }

    /// The notification item pool of a bound node.
    pub fn notify_pool(&self, handle: PluginHandle) -> Option<SharedNotifyPool> {
        self.slots.get(handle.0).map(|slot| Arc::clone(&slot.notify))
    }

    /// The deferred-completion timer of a bound node.
    pub fn slot_timer(&self, handle: PluginHandle) -> Option<TimerHandle> {
        self.slots.get(handle.0).and_then(|slot| slot.timer)
    }
}

impl NodePlugin for SlavePlugin {
    fn name(&self) -> &str {
        "slave"
    }

    fn open(&mut self, services: &mut BusServices, sig: &NodeSignature) -> Option<PluginHandle> {
        if sig.addr.is_master() {
            debug!("open rejected: reserved master address");
            return None;
        }
        if sig.addr.slave_index().is_none() {
            debug!("open rejected: unaddressable node {}", sig);
            return None;
        }
        if !self.accepts(sig) {
            debug!("open rejected: signature {} not managed here", sig);
            return None;
        }

        let Some(key) = self.slots.allocate(SlaveSlot::new(*sig)) else {
            warn!("open rejected for {}: slot pool exhausted", sig);
            return None;
        };
        let handle = PluginHandle(key);

        let Some(timer) = services.alloc_slot_timer(handle) else {
            // without a deferred-completion timer the slot is useless
            self.slots.release(key);
            return None;
        };
        if let Some(slot) = self.slots.get_mut(key) {
            slot.timer = Some(timer);
        }
        debug!("opened {} as slot {}", sig, key.index());
        Some(handle)
    }

    fn close(&mut self, services: &mut BusServices, handle: PluginHandle) -> StrandResult<()> {
        let slot = self
            .slots
            .release(handle.0)
            .ok_or_else(|| StrandError::invalid_handle(format!("slave slot {:?}", handle.0)))?;
        if let Some(timer) = slot.timer {
            if let Err(err) = services.free_timer(timer) {
                error!("releasing slot timer failed: {}", err);
            }
        }
        if let Some(op) = slot.mailbox {
            // the stack cancels the request itself during teardown
            debug!("closed slot with {} still parked", op.token);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        services: &mut BusServices,
        msg: &mut RequestMsg,
        handle: PluginHandle,
    ) -> Disposition {
        let Some(slot) = self.slots.get_mut(handle.0) else {
            warn!("{} executed against an invalid handle", msg.token);
            msg.respond(Response::status(ResponseStatus::Error));
            return Disposition::Complete;
        };

        match msg.opcode {
            Opcode::ReadStatus => {
                msg.respond(Response::ok(vec![slot.status_byte()]));
                Disposition::Complete
            }
            Opcode::ReadVersion => {
                msg.respond(Response::ok(vec![
                    slot.sig.vendor,
                    slot.sig.product,
                    slot.sig.version,
                ]));
                Disposition::Complete
            }
            Opcode::PowerUp | Opcode::PowerDown => {
                if slot.mailbox.is_some() {
                    // the stack's mailbox check makes this unreachable
                    // through send_request; fail closed anyway
                    error!("{} hit an occupied mailbox on {}", msg.token, msg.target);
                    msg.respond(Response::status(ResponseStatus::Error));
                    return Disposition::Complete;
                }
                let Some(timer) = slot.timer else {
                    error!("slot for {} has no timer", msg.target);
                    msg.respond(Response::status(ResponseStatus::Error));
                    return Disposition::Complete;
                };
                slot.mailbox = Some(PendingOp {
                    token: msg.token,
                    opcode: msg.opcode,
                });
                if let Err(err) = services.arm_oneshot(timer, self.config.peripheral_delay) {
                    error!("arming deferred completion failed: {}", err);
                    slot.mailbox = None;
                    msg.respond(Response::status(ResponseStatus::Error));
                    return Disposition::Complete;
                }
                debug!("{} suspended on {} ({})", msg.token, msg.target, msg.opcode);
                Disposition::Suspend
            }
            Opcode::Discover | Opcode::Other(_) => {
                // unknown commands are logged and ignored, never fatal
                debug!("{}: unrecognized command {} ignored", msg.target, msg.opcode);
                msg.respond(Response::status(ResponseStatus::Ignored));
                Disposition::Complete
            }
        }
    }

    fn interrupt(
        &mut self,
        services: &mut BusServices,
        handle: PluginHandle,
        event: InterruptEvent,
    ) {
        let Some(slot) = self.slots.get(handle.0) else {
            debug!("interrupt for invalid handle dropped");
            return;
        };
        match event.kind {
            InterruptKind::Gpio { pin } => {
                let pool = Arc::clone(&slot.notify);
                let source = slot.sig.addr;
                notify::emit(services, &pool, source, NotifyPayload::gpio(pin));
            }
            // only GPIO-class interrupts concern a slave plugin
            _ => {}
        }
    }

    fn timer_fired(
        &mut self,
        services: &mut BusServices,
        handle: PluginHandle,
        _timer: TimerHandle,
    ) {
        let Some(slot) = self.slots.get_mut(handle.0) else {
            debug!("timer fired for invalid handle");
            return;
        };
        let Some(op) = slot.mailbox.take() else {
            debug!("spurious timer expiry on {}", slot.sig.addr);
            return;
        };
        match op.opcode {
            Opcode::PowerUp => slot.power_on = true,
            Opcode::PowerDown => slot.power_on = false,
            other => debug!("deferred completion for unexpected {}", other),
        }
        debug!("{} deferred completion on {}", op.token, slot.sig.addr);
        services.complete_request(op.token, Response::ok(vec![slot.power_on as u8]));
    }
}
