//! Bus stack: plugin registry, request routing, and the tick loop
//!
//! Central orchestrator of one bus segment. The stack owns the
//! registered plugins and their bindings to discovered nodes, the
//! pooled timer service, the link driver, and the in-flight request
//! table. All forward progress happens inside [`BusStack::tick`]:
//!
//! 1. advance the clock
//! 2. poll the link driver (interrupts, faults, discovery outcome)
//! 3. dispatch queued requests to bound plugins
//! 4. dispatch expired timers (plugin resume, external callbacks)
//! 5. drain staged completions into their registered callbacks
//! 6. fan staged notifications out to subscribers
//!
//! There is exactly one cooperative thread of control; suspension is a
//! return value (`Disposition::Suspend`), never a blocked call.

use crate::bus::clock::BusClock;
use crate::bus::link::{DiscoveryOutcome, LinkDriver};
use crate::bus::message::{
    Completion, CompletionCallback, Notification, NotifyClass, RequestMsg, RequestToken, Response,
};
use crate::bus::timer::{TimerHandle, TimerOwner, TimerService, DEFAULT_TIMER_CAPACITY};
use crate::bus::trace::{TraceEvent, TraceLog, DEFAULT_TRACE_CAPACITY};
use crate::config::NodeDescriptor;
use crate::error::{StrandError, StrandResult};
use crate::plugin::traits::{Disposition, NodePlugin, PluginHandle};
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use strand_types::{NodeAddr, NodeSignature, Opcode, ResponseStatus};

/// Stack construction parameters — plain data bag.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Virtual-time step per tick (ignored for wall time).
    pub tick_interval: Duration,
    /// Use virtual time advanced per tick instead of wall time.
    pub virtual_time: bool,
    /// Capacity of the pooled timer service.
    pub timer_capacity: usize,
    /// Maximum notifications staged per tick before publish rejects.
    pub outbox_capacity: usize,
    /// Capacity of the sequence trace ring.
    pub trace_capacity: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            virtual_time: false,
            timer_capacity: DEFAULT_TIMER_CAPACITY,
            outbox_capacity: 32,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

impl StackConfig {
    /// Virtual-time configuration for reproducible tests.
    pub fn deterministic() -> Self {
        Self {
            virtual_time: true,
            ..Self::default()
        }
    }
}

/// The stack facilities plugins are allowed to touch.
///
/// Passed into every plugin call; holds the clock, the timer pool, and
/// the staging areas for completions and outbound notifications. Kept
/// separate from the plugin registry so a plugin call can borrow the
/// services while the stack borrows the plugin.
pub struct BusServices {
    clock: BusClock,
    timers: TimerService,
    completions: Vec<(RequestToken, Response)>,
    outbox: VecDeque<Notification>,
    outbox_capacity: usize,
    trace: TraceLog,
    active_plugin: Option<usize>,
}

impl BusServices {
    pub(crate) fn new(config: &StackConfig) -> Self {
        let clock = if config.virtual_time {
            BusClock::virtual_time(config.tick_interval)
        } else {
            BusClock::wall()
        };
        Self {
            clock,
            timers: TimerService::new(config.timer_capacity),
            completions: Vec::new(),
            outbox: VecDeque::new(),
            outbox_capacity: config.outbox_capacity,
            trace: TraceLog::new(config.trace_capacity),
            active_plugin: None,
        }
    }

    /// Current bus-clock time in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// The bus clock.
    pub fn clock(&self) -> &BusClock {
        &self.clock
    }

    pub(crate) fn set_active_plugin(&mut self, plugin: Option<usize>) {
        self.active_plugin = plugin;
    }

    /// Allocate the deferred-completion timer for a plugin slot.
    ///
    /// `None` when the timer pool is exhausted; the caller releases the
    /// slot it was opening and reports the node as not handled.
    pub fn alloc_slot_timer(&mut self, handle: PluginHandle) -> Option<TimerHandle> {
        let plugin = match self.active_plugin {
            Some(plugin) => plugin,
            None => {
                error!("slot timer requested outside a plugin call");
                return None;
            }
        };
        let timer = self.timers.alloc(TimerOwner::Binding { plugin, handle });
        if timer.is_none() {
            warn!("timer pool exhausted while opening a plugin slot");
        }
        timer
    }

    /// Return a timer to the pool.
    pub fn free_timer(&mut self, timer: TimerHandle) -> StrandResult<()> {
        self.timers.free(timer)
    }

    /// Arm a one-shot expiration `delay` from now.
    pub fn arm_oneshot(&mut self, timer: TimerHandle, delay: Duration) -> StrandResult<()> {
        let now = self.clock.now_ns();
        self.timers.arm_oneshot(timer, now, delay)
    }

    /// Disarm a timer.
    pub fn cancel_timer(&mut self, timer: TimerHandle) -> StrandResult<()> {
        self.timers.cancel(timer)
    }

    /// Whether a timer has a pending expiration.
    pub fn timer_armed(&self, timer: TimerHandle) -> bool {
        self.timers.is_armed(timer)
    }

    /// Mark a suspended request as complete ("this request is done").
    ///
    /// Called by plugins from `timer_fired`; the completion reaches the
    /// registered callback later in the same tick.
    pub fn complete_request(&mut self, token: RequestToken, response: Response) {
        self.completions.push((token, response));
    }

    /// Best-effort notification publish.
    ///
    /// Takes ownership of the envelope. Returns `false` when the stage
    /// queue is full; the envelope is dropped (finalized) and the
    /// event is lost.
    pub fn publish(&mut self, notification: Notification) -> bool {
        if self.outbox.len() >= self.outbox_capacity {
            return false;
        }
        self.outbox.push_back(notification);
        true
    }

    /// Number of armed timers (deferred completions pending).
    pub fn timers_armed(&self) -> usize {
        self.timers.armed()
    }

    /// Number of allocated timers.
    pub fn timers_in_use(&self) -> usize {
        self.timers.in_use()
    }

    pub(crate) fn take_staged_completions(&mut self) -> Vec<(RequestToken, Response)> {
        std::mem::take(&mut self.completions)
    }

    /// Trace hook for notifications dropped before an envelope existed.
    pub fn note_notification_dropped(&mut self, source: NodeAddr) {
        let now = self.clock.now_ns();
        self.trace
            .record(now, TraceEvent::NotificationDropped { source });
    }

    fn trace_record(&mut self, event: TraceEvent) {
        let now = self.clock.now_ns();
        self.trace.record(now, event);
    }
}

/// Subscription handle returned by [`BusStack::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    class: NotifyClass,
    callback: Box<dyn FnMut(&Notification) + Send>,
}

struct Binding {
    addr: NodeAddr,
    plugin: usize,
    handle: PluginHandle,
}

struct PendingDispatch {
    token: RequestToken,
    target: NodeAddr,
    opcode: Opcode,
    payload: Vec<u8>,
}

struct ActiveDiscovery {
    token: RequestToken,
}

/// Aggregate resource counters for leak checks and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackStats {
    /// Requests queued for dispatch.
    pub pending: usize,
    /// Requests parked in slot mailboxes.
    pub suspended: usize,
    /// Open (plugin, node) bindings.
    pub bound_nodes: usize,
    /// Allocated timers.
    pub timers_in_use: usize,
    /// Active subscriptions.
    pub subscribers: usize,
}

/// Central orchestrator: owns plugins, bindings, timers, the driver,
/// and drives everything from `tick`.
pub struct BusStack {
    services: BusServices,
    plugins: Vec<Box<dyn NodePlugin>>,
    bindings: Vec<Binding>,
    driver: Box<dyn LinkDriver>,
    topology: Vec<NodeDescriptor>,
    pending: VecDeque<PendingDispatch>,
    suspended: Vec<RequestToken>,
    inflight_target: HashMap<u64, NodeAddr>,
    callbacks: HashMap<u64, CompletionCallback>,
    subscribers: Vec<Subscriber>,
    external_timers: HashMap<TimerHandle, Box<dyn FnMut() + Send>>,
    discovery: Option<ActiveDiscovery>,
    discovered: Vec<NodeSignature>,
    next_token: u64,
    next_subscription: u64,
}

impl BusStack {
    /// Stack over `driver` with the given configuration.
    pub fn new(driver: Box<dyn LinkDriver>, config: StackConfig) -> Self {
        Self {
            services: BusServices::new(&config),
            plugins: Vec::new(),
            bindings: Vec::new(),
            driver,
            topology: Vec::new(),
            pending: VecDeque::new(),
            suspended: Vec::new(),
            inflight_target: HashMap::new(),
            callbacks: HashMap::new(),
            subscribers: Vec::new(),
            external_timers: HashMap::new(),
            discovery: None,
            discovered: Vec::new(),
            next_token: 0,
            next_subscription: 0,
        }
    }

    /// Register a plugin. Registration order is probe order at
    /// discovery time.
    pub fn register_plugin(&mut self, plugin: Box<dyn NodePlugin>) -> usize {
        info!("registered plugin '{}'", plugin.name());
        self.plugins.push(plugin);
        self.plugins.len() - 1
    }

    /// Set the topology the next discovery run enumerates against.
    pub fn set_topology(&mut self, topology: Vec<NodeDescriptor>) {
        self.topology = topology;
    }

    /// Number of nodes found by the last successful discovery.
    pub fn node_count(&self) -> usize {
        self.discovered.len()
    }

    /// Signatures found by the last successful discovery, address order.
    pub fn discovered(&self) -> &[NodeSignature] {
        &self.discovered
    }

    /// Whether `addr` has an open plugin binding.
    pub fn is_bound(&self, addr: NodeAddr) -> bool {
        self.bindings.iter().any(|b| b.addr == addr)
    }

    /// Resource counters.
    pub fn stats(&self) -> StackStats {
        StackStats {
            pending: self.pending.len(),
            suspended: self.suspended.len(),
            bound_nodes: self.bindings.len(),
            timers_in_use: self.services.timers.in_use(),
            subscribers: self.subscribers.len(),
        }
    }

    /// The stack services (clock, timers, staging).
    pub fn services(&self) -> &BusServices {
        &self.services
    }

    /// Current bus-clock time in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.services.now_ns()
    }

    /// Append an event to the sequence trace.
    pub fn record_trace(&mut self, event: TraceEvent) {
        self.services.trace_record(event);
    }

    /// The sequence trace.
    pub fn trace(&self) -> &TraceLog {
        &self.services.trace
    }

    /// Mutable access to the sequence trace (start/stop/clear).
    pub fn trace_mut(&mut self) -> &mut TraceLog {
        &mut self.services.trace
    }

    /// Read a register through the link driver.
    pub fn read_register(&mut self, node: NodeAddr, reg: u8) -> StrandResult<u8> {
        self.driver.read_register(node, reg)
    }

    /// Write a register through the link driver.
    pub fn write_register(&mut self, node: NodeAddr, reg: u8, value: u8) -> StrandResult<()> {
        self.driver.write_register(node, reg, value)
    }

    // ---- subscriptions -------------------------------------------------

    /// Register a callback for one notification class.
    pub fn subscribe(
        &mut self,
        class: NotifyClass,
        callback: Box<dyn FnMut(&Notification) + Send>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            class,
            callback,
        });
        id
    }

    /// Remove a subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> StrandResult<()> {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        if self.subscribers.len() == before {
            return Err(StrandError::not_found(format!("subscription {:?}", id)));
        }
        Ok(())
    }

    // ---- external timers ----------------------------------------------

    /// Allocate a timer dispatched to `callback` on expiry.
    pub fn alloc_external_timer(
        &mut self,
        callback: Box<dyn FnMut() + Send>,
    ) -> StrandResult<TimerHandle> {
        let timer = self
            .services
            .timers
            .alloc(TimerOwner::External)
            .ok_or(StrandError::Exhausted { resource: "timers" })?;
        self.external_timers.insert(timer, callback);
        Ok(timer)
    }

    /// Arm an external timer periodically.
    pub fn arm_periodic(&mut self, timer: TimerHandle, period: Duration) -> StrandResult<()> {
        let now = self.services.clock.now_ns();
        self.services.timers.arm_periodic(timer, now, period)
    }

    /// Cancel and free an external timer.
    pub fn release_external_timer(&mut self, timer: TimerHandle) -> StrandResult<()> {
        self.external_timers.remove(&timer);
        self.services.timers.free(timer)
    }

    // ---- requests ------------------------------------------------------

    /// Queue a request for dispatch, registering its completion
    /// callback.
    ///
    /// Enforced at this boundary: one in-flight request per node
    /// mailbox (`MailboxBusy`), only `Discover` may address the master,
    /// and slave targets must be bound.
    pub fn send_request(
        &mut self,
        target: NodeAddr,
        opcode: Opcode,
        payload: Vec<u8>,
        callback: CompletionCallback,
    ) -> StrandResult<RequestToken> {
        match target {
            NodeAddr::Master => {
                if opcode != Opcode::Discover {
                    return Err(StrandError::invalid_input(format!(
                        "master accepts only discovery requests, got {}",
                        opcode
                    )));
                }
                if self.discovery.is_some() || self.pending.iter().any(|p| p.target.is_master()) {
                    return Err(StrandError::MailboxBusy { node: target });
                }
            }
            NodeAddr::Slave(_) => {
                if !self.is_bound(target) {
                    return Err(StrandError::not_found(format!("no binding for {}", target)));
                }
                let busy = self.pending.iter().any(|p| p.target == target)
                    || self
                        .suspended
                        .iter()
                        .any(|token| self.inflight_target.get(&token.0) == Some(&target));
                if busy {
                    return Err(StrandError::MailboxBusy { node: target });
                }
            }
            NodeAddr::Unknown => {
                return Err(StrandError::invalid_input("cannot address unknown node"));
            }
        }

        let token = RequestToken(self.next_token);
        self.next_token += 1;
        self.inflight_target.insert(token.0, target);
        self.callbacks.insert(token.0, callback);
        self.pending.push_back(PendingDispatch {
            token,
            target,
            opcode,
            payload,
        });
        self.services.trace_record(TraceEvent::RequestIssued {
            token: token.0,
            target,
            opcode,
        });
        debug!("{} queued for {} ({})", token, target, opcode);
        Ok(token)
    }

    // ---- tick loop -----------------------------------------------------

    /// Advance the stack by one cooperative tick.
    pub fn tick(&mut self) {
        self.services.clock.advance_tick();
        let now = self.services.clock.now_ns();

        self.poll_driver_events();
        self.poll_discovery();
        self.dispatch_pending();
        self.dispatch_timers(now);
        self.drain_completions();
        self.fan_out_notifications();
    }

    fn poll_driver_events(&mut self) {
        use crate::bus::link::LinkEvent;

        let mut events = Vec::new();
        while let Some(event) = self.driver.poll_event() {
            events.push(event);
        }
        for event in events {
            match event {
                LinkEvent::Interrupt(irq) => {
                    let binding = self
                        .bindings
                        .iter()
                        .find(|b| b.addr == irq.source)
                        .map(|b| (b.plugin, b.handle));
                    match binding {
                        Some((plugin, handle)) => {
                            self.services.set_active_plugin(Some(plugin));
                            self.plugins[plugin].interrupt(&mut self.services, handle, irq);
                            self.services.set_active_plugin(None);
                        }
                        None => {
                            debug!("interrupt from unbound node {} dropped", irq.source);
                        }
                    }
                }
                LinkEvent::Fault(fault) => {
                    if !self.services.publish(Notification::power_fault(fault)) {
                        warn!("fault notification dropped ({}): queue full", fault);
                    }
                }
            }
        }
    }

    fn poll_discovery(&mut self) {
        let Some(active) = self.discovery.take() else {
            return;
        };
        let Some(outcome) = self.driver.poll_discovery() else {
            self.discovery = Some(active);
            return;
        };

        let response = match outcome {
            DiscoveryOutcome::Success { nodes } => {
                info!("discovery finished: {} node(s)", nodes.len());
                self.discovered = nodes;
                self.open_bindings();
                Response::ok(vec![self.discovered.len() as u8])
            }
            DiscoveryOutcome::AuthFailure { node } => {
                warn!("discovery authentication failure at {}", node);
                Response::status(ResponseStatus::AuthFailure)
            }
            DiscoveryOutcome::Fault(fault) => {
                warn!("discovery interrupted by fault: {}", fault);
                Response::status(ResponseStatus::Fault)
            }
            DiscoveryOutcome::Failed { reason } => {
                warn!("discovery failed: {}", reason);
                Response::status(ResponseStatus::Error)
            }
        };
        self.services.complete_request(active.token, response);
    }

    /// Offer every discovered node to the plugins in registration
    /// order; the first to claim it owns the binding.
    fn open_bindings(&mut self) {
        let signatures = self.discovered.clone();
        for sig in signatures {
            if self.bindings.iter().any(|b| b.addr == sig.addr) {
                continue;
            }
            let mut claimed = false;
            for plugin in 0..self.plugins.len() {
                self.services.set_active_plugin(Some(plugin));
                let handle = self.plugins[plugin].open(&mut self.services, &sig);
                self.services.set_active_plugin(None);
                if let Some(handle) = handle {
                    debug!(
                        "node {} claimed by plugin '{}'",
                        sig,
                        self.plugins[plugin].name()
                    );
                    self.bindings.push(Binding {
                        addr: sig.addr,
                        plugin,
                        handle,
                    });
                    claimed = true;
                    break;
                }
            }
            if !claimed {
                warn!("node {} left unmanaged (no plugin claimed it)", sig);
            }
        }
    }

    fn dispatch_pending(&mut self) {
        let drained: Vec<PendingDispatch> = self.pending.drain(..).collect();
        for request in drained {
            if request.target.is_master() {
                self.start_discovery(request);
                continue;
            }
            self.dispatch_to_plugin(request);
        }
    }

    fn start_discovery(&mut self, request: PendingDispatch) {
        if self.topology.is_empty() {
            error!("discovery requested with no topology loaded");
            self.services
                .complete_request(request.token, Response::status(ResponseStatus::Error));
            return;
        }
        match self.driver.begin_discovery(&self.topology) {
            Ok(()) => {
                self.discovery = Some(ActiveDiscovery {
                    token: request.token,
                });
            }
            Err(err) => {
                error!("discovery start failed: {}", err);
                self.services
                    .complete_request(request.token, Response::status(ResponseStatus::Error));
            }
        }
    }

    fn dispatch_to_plugin(&mut self, request: PendingDispatch) {
        let binding = self
            .bindings
            .iter()
            .find(|b| b.addr == request.target)
            .map(|b| (b.plugin, b.handle));
        let Some((plugin, handle)) = binding else {
            // binding vanished between queue and dispatch (teardown race)
            warn!("{} targeted unbound node {}", request.token, request.target);
            self.services
                .complete_request(request.token, Response::status(ResponseStatus::Error));
            return;
        };

        let mut msg = RequestMsg {
            token: request.token,
            target: request.target,
            opcode: request.opcode,
            payload: request.payload,
            response: None,
        };
        self.services.set_active_plugin(Some(plugin));
        let disposition = self.plugins[plugin].execute(&mut self.services, &mut msg, handle);
        self.services.set_active_plugin(None);

        match disposition {
            Disposition::Complete => {
                let response = msg
                    .response
                    .take()
                    .unwrap_or_else(|| Response::status(ResponseStatus::Ignored));
                self.services.complete_request(msg.token, response);
            }
            Disposition::Schedule => {
                self.pending.push_back(PendingDispatch {
                    token: msg.token,
                    target: msg.target,
                    opcode: msg.opcode,
                    payload: msg.payload,
                });
            }
            Disposition::Suspend => {
                self.suspended.push(msg.token);
                self.services.trace_record(TraceEvent::RequestSuspended {
                    token: msg.token.0,
                    target: msg.target,
                });
            }
        }
    }

    fn dispatch_timers(&mut self, now: u64) {
        let due = self.services.timers.expire(now);
        for (timer, owner) in due {
            match owner {
                TimerOwner::Binding { plugin, handle } => {
                    if plugin >= self.plugins.len() {
                        error!("timer owned by unknown plugin index {}", plugin);
                        continue;
                    }
                    self.services.set_active_plugin(Some(plugin));
                    self.plugins[plugin].timer_fired(&mut self.services, handle, timer);
                    self.services.set_active_plugin(None);
                }
                TimerOwner::External => match self.external_timers.get_mut(&timer) {
                    Some(callback) => callback(),
                    None => debug!("expired external timer {:?} has no callback", timer),
                },
            }
        }
    }

    fn drain_completions(&mut self) {
        let staged = self.services.take_staged_completions();
        for (token, response) in staged {
            self.finalize(token, response, false);
        }
    }

    fn finalize(&mut self, token: RequestToken, response: Response, cancelled: bool) {
        let target = self
            .inflight_target
            .remove(&token.0)
            .unwrap_or(NodeAddr::Unknown);
        self.suspended.retain(|t| *t != token);
        self.services.trace_record(TraceEvent::RequestCompleted {
            token: token.0,
            status: response.status,
            cancelled,
        });
        let completion = Completion {
            token,
            target,
            status: response.status,
            payload: response.payload,
            cancelled,
        };
        match self.callbacks.remove(&token.0) {
            Some(mut callback) => callback(&completion),
            None => debug!("{} completed without a callback", token),
        }
    }

    fn fan_out_notifications(&mut self) {
        let staged: Vec<Notification> = self.services.outbox.drain(..).collect();
        for notification in staged {
            self.services.trace_record(TraceEvent::NotificationPublished {
                source: notification.source,
                payload: notification.payload(),
            });
            for subscriber in self.subscribers.iter_mut() {
                if subscriber.class == notification.class {
                    (subscriber.callback)(&notification);
                }
            }
            // dropping the envelope finalizes it; a leased payload item
            // returns to its pool here
        }
    }

    // ---- teardown ------------------------------------------------------

    /// Full segment teardown: cancel everything in flight, close all
    /// bindings, reset the driver. Subscriptions and external timers
    /// are the controller's to remove.
    pub fn teardown_segment(&mut self) {
        self.services.trace_record(TraceEvent::Teardown);

        // settle anything a plugin already completed
        self.drain_completions();

        let queued: Vec<RequestToken> = self.pending.drain(..).map(|p| p.token).collect();
        for token in queued {
            self.finalize(token, Response::status(ResponseStatus::Error), true);
        }
        let suspended = std::mem::take(&mut self.suspended);
        for token in suspended {
            self.finalize(token, Response::status(ResponseStatus::Error), true);
        }
        if let Some(active) = self.discovery.take() {
            self.finalize(active.token, Response::status(ResponseStatus::Error), true);
        }

        let bindings = std::mem::take(&mut self.bindings);
        for binding in bindings {
            self.services.set_active_plugin(Some(binding.plugin));
            if let Err(err) = self.plugins[binding.plugin].close(&mut self.services, binding.handle)
            {
                error!("closing binding for {} failed: {}", binding.addr, err);
            }
            self.services.set_active_plugin(None);
        }

        self.discovered.clear();
        self.services.outbox.clear();
        self.driver.reset();
        info!("segment teardown complete");
    }
}
