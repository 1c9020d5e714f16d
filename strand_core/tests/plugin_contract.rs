// Stack-level plugin contract: request round trips, the
// suspend/resume path, mailbox enforcement, cancellation on teardown,
// the Schedule re-poll path, and best-effort notification delivery.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use strand_core::bus::link::LinkEvent;
use strand_core::bus::message::{Completion, NotifyClass};
use strand_core::bus::StackConfig;
use strand_core::error::StrandError;
use strand_core::plugin::{
    Disposition, NodePlugin, PluginHandle, SlotPool, NOTIFY_ITEMS_PER_SLOT,
};
use strand_core::{BusServices, BusStack, RequestMsg, Response, SlavePlugin, TimerHandle};
use strand_types::{
    InterruptEvent, InterruptKind, NodeAddr, NodeSignature, NotifyPayload, Opcode, ResponseStatus,
};

mod common;
use common::{init_logs, scripted_driver, topology, DriverControl};

type CompletionCell = Arc<Mutex<Option<Completion>>>;

fn capture() -> (CompletionCell, Box<dyn FnMut(&Completion) + Send>) {
    let cell: CompletionCell = Arc::new(Mutex::new(None));
    let writer = Arc::clone(&cell);
    (
        cell,
        Box::new(move |completion| {
            *writer.lock() = Some(completion.clone());
        }),
    )
}

/// Stack with a default slave plugin, discovered and bound to `nodes`
/// identical nodes.
fn bound_stack(nodes: u8) -> (BusStack, DriverControl) {
    init_logs();
    let (driver, control) = scripted_driver();
    let mut stack = BusStack::new(Box::new(driver), StackConfig::deterministic());
    stack.register_plugin(Box::new(SlavePlugin::with_defaults()));
    stack.set_topology(topology(nodes, 0xAD));

    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), callback)
        .unwrap();
    for _ in 0..10 {
        stack.tick();
        if done.lock().is_some() {
            break;
        }
    }
    let completion = done.lock().take().expect("discovery must complete");
    assert_eq!(completion.status, ResponseStatus::Ok);
    assert_eq!(stack.node_count(), nodes as usize);
    (stack, control)
}

// ============================================================
// Round trips
// ============================================================

#[test]
fn sync_request_round_trip() {
    let (mut stack, _control) = bound_stack(1);
    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::ReadVersion, Vec::new(), callback)
        .unwrap();
    stack.tick();

    let completion = done.lock().take().unwrap();
    assert_eq!(completion.status, ResponseStatus::Ok);
    assert_eq!(completion.payload, vec![0xAD, 0x28, 1]);
    assert!(!completion.cancelled);
}

#[test]
fn unknown_opcode_is_ignored_not_fatal() {
    let (mut stack, _control) = bound_stack(1);
    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::Other(0x6f), Vec::new(), callback)
        .unwrap();
    stack.tick();

    let completion = done.lock().take().unwrap();
    assert_eq!(completion.status, ResponseStatus::Ignored);
}

#[test]
fn unbound_targets_are_rejected() {
    let (mut stack, _control) = bound_stack(1);
    let (_done, callback) = capture();
    let err = stack
        .send_request(NodeAddr::Slave(5), Opcode::ReadStatus, Vec::new(), callback)
        .unwrap_err();
    assert!(matches!(err, StrandError::NotFound(_)));
}

#[test]
fn master_accepts_only_discovery() {
    let (mut stack, _control) = bound_stack(1);
    let (_done, callback) = capture();
    let err = stack
        .send_request(NodeAddr::Master, Opcode::ReadStatus, Vec::new(), callback)
        .unwrap_err();
    assert!(matches!(err, StrandError::InvalidInput(_)));
}

#[test]
fn concurrent_discovery_hits_master_mailbox() {
    init_logs();
    let (driver, _control) = scripted_driver();
    let mut stack = BusStack::new(Box::new(driver), StackConfig::deterministic());
    stack.register_plugin(Box::new(SlavePlugin::with_defaults()));
    stack.set_topology(topology(1, 0xAD));

    let (_d1, cb1) = capture();
    stack
        .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), cb1)
        .unwrap();
    let (_d2, cb2) = capture();
    let err = stack
        .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), cb2)
        .unwrap_err();
    assert!(matches!(err, StrandError::MailboxBusy { .. }));
}

// ============================================================
// Suspend / resume
// ============================================================

#[test]
fn deferred_power_up_suspends_and_resumes() {
    let (mut stack, _control) = bound_stack(1);
    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::PowerUp, Vec::new(), callback)
        .unwrap();
    stack.tick();

    // suspended: no completion yet, exactly one armed timer
    assert!(done.lock().is_none());
    assert_eq!(stack.stats().suspended, 1);
    assert_eq!(stack.services().timers_armed(), 1);

    // the mailbox is busy for the whole suspension
    let (_other, other_cb) = capture();
    let err = stack
        .send_request(NodeAddr::Slave(0), Opcode::ReadStatus, Vec::new(), other_cb)
        .unwrap_err();
    assert!(matches!(err, StrandError::MailboxBusy { .. }));

    // modeled peripheral latency: 25 virtual ms
    for _ in 0..30 {
        stack.tick();
        if done.lock().is_some() {
            break;
        }
    }
    let completion = done.lock().take().unwrap();
    assert_eq!(completion.status, ResponseStatus::Ok);
    assert_eq!(completion.payload, vec![1], "powered on");
    assert_eq!(stack.stats().suspended, 0);
    assert_eq!(stack.services().timers_armed(), 0);

    // the cached status now reports the peripheral powered
    let (status_done, status_cb) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::ReadStatus, Vec::new(), status_cb)
        .unwrap();
    stack.tick();
    assert_eq!(status_done.lock().take().unwrap().payload, vec![0x01]);
}

#[test]
fn per_node_mailboxes_are_independent() {
    let (mut stack, _control) = bound_stack(2);
    let (done0, cb0) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::PowerUp, Vec::new(), cb0)
        .unwrap();
    stack.tick();
    assert!(done0.lock().is_none());

    // node 1 is unaffected by node 0's suspension
    let (done1, cb1) = capture();
    stack
        .send_request(NodeAddr::Slave(1), Opcode::ReadVersion, Vec::new(), cb1)
        .unwrap();
    stack.tick();
    assert!(done1.lock().is_some());
    assert!(done0.lock().is_none());
}

// ============================================================
// Cancellation
// ============================================================

#[test]
fn teardown_cancels_suspended_requests() {
    let (mut stack, _control) = bound_stack(1);
    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::PowerDown, Vec::new(), callback)
        .unwrap();
    stack.tick();
    assert!(done.lock().is_none());

    stack.teardown_segment();
    let completion = done.lock().take().unwrap();
    assert!(completion.cancelled, "callback must see the cancel flag");

    let stats = stack.stats();
    assert_eq!(stats.suspended, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.bound_nodes, 0);
    assert_eq!(stats.timers_in_use, 0, "slot timers freed with bindings");
}

#[test]
fn teardown_cancels_active_discovery() {
    init_logs();
    let (driver, control) = scripted_driver();
    control.set_discovery_delay(1000); // never completes on its own
    let mut stack = BusStack::new(Box::new(driver), StackConfig::deterministic());
    stack.register_plugin(Box::new(SlavePlugin::with_defaults()));
    stack.set_topology(topology(1, 0xAD));

    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), callback)
        .unwrap();
    for _ in 0..5 {
        stack.tick();
    }
    assert!(done.lock().is_none());

    stack.teardown_segment();
    let completion = done.lock().take().unwrap();
    assert!(completion.cancelled);
    assert_eq!(control.resets(), 1);
}

// ============================================================
// Schedule re-poll
// ============================================================

/// Claims vendor 0x77 nodes; defers the first dispatch of every
/// request with `Schedule`, answers on the second.
struct DeferOncePlugin {
    slots: SlotPool<NodeSignature>,
    executes: Arc<Mutex<u32>>,
    deferred: Arc<Mutex<VecDeque<u64>>>,
}

impl DeferOncePlugin {
    fn new(executes: Arc<Mutex<u32>>) -> Self {
        Self {
            slots: SlotPool::new(4),
            executes,
            deferred: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl NodePlugin for DeferOncePlugin {
    fn open(&mut self, _services: &mut BusServices, sig: &NodeSignature) -> Option<PluginHandle> {
        if sig.addr.is_master() || sig.vendor != 0x77 {
            return None;
        }
        self.slots.allocate(*sig).map(PluginHandle)
    }

    fn close(
        &mut self,
        _services: &mut BusServices,
        handle: PluginHandle,
    ) -> Result<(), StrandError> {
        self.slots
            .release(handle.0)
            .map(|_| ())
            .ok_or_else(|| StrandError::invalid_handle("defer-once slot"))
    }

    fn execute(
        &mut self,
        _services: &mut BusServices,
        msg: &mut RequestMsg,
        _handle: PluginHandle,
    ) -> Disposition {
        *self.executes.lock() += 1;
        let token = msg.token.value();
        let mut deferred = self.deferred.lock();
        if deferred.contains(&token) {
            deferred.retain(|t| *t != token);
            msg.respond(Response::ok(vec![0x5A]));
            Disposition::Complete
        } else {
            deferred.push_back(token);
            Disposition::Schedule
        }
    }

    fn interrupt(&mut self, _: &mut BusServices, _: PluginHandle, _: InterruptEvent) {}

    fn timer_fired(&mut self, _: &mut BusServices, _: PluginHandle, _: TimerHandle) {}
}

#[test]
fn schedule_disposition_is_redispatched() {
    init_logs();
    let executes = Arc::new(Mutex::new(0u32));
    let (driver, _control) = scripted_driver();
    let mut stack = BusStack::new(Box::new(driver), StackConfig::deterministic());
    // registration order decides probe order: the defer-once plugin
    // claims its vendor before the general slave plugin sees it
    stack.register_plugin(Box::new(DeferOncePlugin::new(Arc::clone(&executes))));
    stack.register_plugin(Box::new(SlavePlugin::with_defaults()));
    stack.set_topology(topology(1, 0x77));

    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), callback)
        .unwrap();
    for _ in 0..10 {
        stack.tick();
        if done.lock().is_some() {
            break;
        }
    }
    assert!(stack.is_bound(NodeAddr::Slave(0)));

    let (reply, reply_cb) = capture();
    stack
        .send_request(NodeAddr::Slave(0), Opcode::ReadStatus, Vec::new(), reply_cb)
        .unwrap();
    stack.tick(); // first dispatch: Schedule
    assert!(reply.lock().is_none());
    stack.tick(); // second dispatch: Complete

    let completion = reply.lock().take().unwrap();
    assert_eq!(completion.payload, vec![0x5A]);
    assert_eq!(*executes.lock(), 2);
}

// ============================================================
// Notifications
// ============================================================

#[test]
fn gpio_interrupts_fan_out_to_subscribers() {
    let (mut stack, control) = bound_stack(1);
    let seen: Arc<Mutex<Vec<NotifyPayload>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    stack.subscribe(
        NotifyClass::Interrupt,
        Box::new(move |notification| {
            if let Some(payload) = notification.payload() {
                sink.lock().push(payload);
            }
        }),
    );

    control.push_event(LinkEvent::Interrupt(InterruptEvent {
        source: NodeAddr::Slave(0),
        kind: InterruptKind::Gpio { pin: 6 },
    }));
    stack.tick();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].param, 6);
}

#[test]
fn non_gpio_interrupts_are_dropped_silently() {
    let (mut stack, control) = bound_stack(1);
    let count = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&count);
    stack.subscribe(
        NotifyClass::Interrupt,
        Box::new(move |_| *sink.lock() += 1),
    );

    for kind in [
        InterruptKind::Crc,
        InterruptKind::DataParity,
        InterruptKind::Other(0x42),
    ] {
        control.push_event(LinkEvent::Interrupt(InterruptEvent {
            source: NodeAddr::Slave(0),
            kind,
        }));
    }
    stack.tick();
    assert_eq!(*count.lock(), 0);
}

#[test]
fn notification_storm_drops_overflow_and_recovers() {
    let (mut stack, control) = bound_stack(1);
    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    stack.subscribe(
        NotifyClass::Interrupt,
        Box::new(move |_| *sink.lock() += 1),
    );

    // one tick's worth of events far beyond the per-slot item pool
    for pin in 0..(NOTIFY_ITEMS_PER_SLOT as u8 * 3) {
        control.push_event(LinkEvent::Interrupt(InterruptEvent {
            source: NodeAddr::Slave(0),
            kind: InterruptKind::Gpio { pin },
        }));
    }
    stack.tick();
    assert_eq!(
        *count.lock(),
        NOTIFY_ITEMS_PER_SLOT,
        "exactly the pooled items get through, the overflow drops"
    );

    // fan-out finalized the envelopes, so the items are free again
    for pin in 0..4u8 {
        control.push_event(LinkEvent::Interrupt(InterruptEvent {
            source: NodeAddr::Slave(0),
            kind: InterruptKind::Gpio { pin },
        }));
    }
    stack.tick();
    assert_eq!(*count.lock(), NOTIFY_ITEMS_PER_SLOT + 4);
}

#[test]
fn unmanaged_nodes_are_skipped_not_fatal() {
    init_logs();
    let (driver, _control) = scripted_driver();
    let mut stack = BusStack::new(Box::new(driver), StackConfig::deterministic());
    // plugin only manages vendor 0xAD; the topology carries a stranger
    stack.register_plugin(Box::new(SlavePlugin::new(
        strand_core::SlavePluginConfig {
            vendor: Some(0xAD),
            ..Default::default()
        },
    )));
    stack.set_topology(topology(1, 0x99));

    let (done, callback) = capture();
    stack
        .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), callback)
        .unwrap();
    for _ in 0..10 {
        stack.tick();
        if done.lock().is_some() {
            break;
        }
    }
    assert_eq!(done.lock().take().unwrap().status, ResponseStatus::Ok);
    assert_eq!(stack.node_count(), 1);
    assert!(!stack.is_bound(NodeAddr::Slave(0)));
}
