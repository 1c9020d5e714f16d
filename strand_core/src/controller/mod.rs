//! Discovery/fault-recovery controller
//!
//! One instance per managed bus segment. Drives the stack tick loop
//! and walks the bring-up state machine:
//!
//! ```text
//! Idle → Initializing → Loading → Starting → Discovering → {Up, Failed}
//!                ▲                                  │
//!                └────────── Recovering ◄───────────┘ (fault)
//!                                │
//!                                └──► Degraded (budget exhausted)
//! ```
//!
//! `Loading` selects the active configuration (cycling through the
//! fallback set on authentication failures, default last). `Starting`
//! registers for both notification classes *before* any discovery
//! request so no early fault is missed. From `Up` the monitor tick
//! watches fault notifications, resets line error counters, and runs
//! the bus-drop identity scan; any fault converges on the same bounded
//! retry machinery.

mod discovery;
mod fault;
mod monitor;

pub use discovery::{active_config_index, AttemptOutcome, DiscoveryAttempt, FailureClass};
pub use fault::{FaultRecord, FaultStatus};

use crate::bus::message::{Completion, NotifyClass};
use crate::bus::stack::{BusStack, SubscriptionId};
use crate::bus::timer::TimerHandle;
use crate::bus::trace::TraceEvent;
use crate::config::{BusProfile, SegmentConfig};
use crate::error::StrandResult;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use strand_types::{FaultEvent, NodeAddr, Opcode, ResponseStatus};

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    /// Constructed, not started.
    Idle,
    /// (Re)building environment bindings. Idempotent.
    Initializing,
    /// Selecting the active configuration.
    Loading,
    /// Registering notification subscriptions.
    Starting,
    /// Discovery request in flight.
    Discovering,
    /// Segment enumerated and running.
    Up,
    /// Bring-up failed (auth budget or unrecoverable failure).
    Failed,
    /// Fault observed; waiting to tear down and retry.
    Recovering,
    /// Retry budget exhausted; still ticking with the fault flagged.
    Degraded,
}

impl ControllerState {
    /// Short string form used in logs and status snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Loading => "Loading",
            Self::Starting => "Starting",
            Self::Discovering => "Discovering",
            Self::Up => "Up",
            Self::Failed => "Failed",
            Self::Recovering => "Recovering",
            Self::Degraded => "Degraded",
        }
    }

    /// Whether the state machine has settled (no transition without
    /// external input).
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Up | Self::Failed | Self::Degraded)
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery completion as captured by the registered callback.
#[derive(Debug, Clone)]
struct DiscoveryResult {
    status: ResponseStatus,
    cancelled: bool,
}

/// Cells written by stack-invoked callbacks and drained by the
/// controller tick. Same thread; the mutexes only scope the borrows.
struct Inbox {
    discovery: Arc<Mutex<Option<DiscoveryResult>>>,
    faults: Arc<Mutex<VecDeque<FaultEvent>>>,
    error_reset_due: Arc<Mutex<bool>>,
    interrupts_seen: Arc<Mutex<u64>>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            discovery: Arc::new(Mutex::new(None)),
            faults: Arc::new(Mutex::new(VecDeque::new())),
            error_reset_due: Arc::new(Mutex::new(false)),
            interrupts_seen: Arc::new(Mutex::new(0)),
        }
    }

    fn clear(&self) {
        *self.discovery.lock() = None;
        self.faults.lock().clear();
        *self.error_reset_due.lock() = false;
    }
}

/// Serializable controller status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub active_index: usize,
    pub active_config: String,
    pub node_count: usize,
    pub auth_retries: u32,
    pub fault: Option<FaultStatus>,
}

impl ControllerStatus {
    /// JSON form for diagnostics dumps.
    pub fn to_json(&self) -> StrandResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The discovery/fault-recovery controller for one bus segment.
pub struct BusController {
    stack: BusStack,
    profile: BusProfile,
    state: ControllerState,
    attempt: Option<DiscoveryAttempt>,
    fault: Option<FaultRecord>,
    active_index: usize,
    node_count: usize,
    inbox: Inbox,
    subscriptions: Vec<SubscriptionId>,
    error_timer: Option<TimerHandle>,
    monitor_ticks: u64,
    resume_at_ns: Option<u64>,
    discovery_issued: bool,
}

impl BusController {
    /// Controller over `stack` driven by `profile`.
    pub fn new(profile: BusProfile, stack: BusStack) -> StrandResult<Self> {
        profile.validate()?;
        let active_index = profile.default_index;
        Ok(Self {
            stack,
            profile,
            state: ControllerState::Idle,
            attempt: None,
            fault: None,
            active_index,
            node_count: 0,
            inbox: Inbox::new(),
            subscriptions: Vec::new(),
            error_timer: None,
            monitor_ticks: 0,
            resume_at_ns: None,
            discovery_issued: false,
        })
    }

    /// Begin bring-up.
    pub fn start(&mut self) {
        if self.state != ControllerState::Idle {
            warn!("start() called in state {}", self.state);
            return;
        }
        self.set_state(ControllerState::Initializing);
    }

    /// Advance the segment by one cooperative tick.
    pub fn tick(&mut self) {
        self.stack.tick();
        self.step();
    }

    /// Tick until the state machine settles or `max_ticks` elapse.
    pub fn run_until_settled(&mut self, max_ticks: u64) -> ControllerState {
        for _ in 0..max_ticks {
            if self.state.is_settled() {
                break;
            }
            self.tick();
        }
        self.state
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Node count recorded by the last successful discovery.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// The active configuration variant.
    pub fn active_config(&self) -> &SegmentConfig {
        self.profile.config(self.active_index)
    }

    /// The unrecovered fault, if any.
    pub fn fault(&self) -> Option<&FaultRecord> {
        self.fault.as_ref()
    }

    /// Interrupt notifications observed since construction.
    pub fn interrupts_seen(&self) -> u64 {
        *self.inbox.interrupts_seen.lock()
    }

    /// The underlying stack.
    pub fn stack(&self) -> &BusStack {
        &self.stack
    }

    /// Mutable access to the underlying stack.
    pub fn stack_mut(&mut self) -> &mut BusStack {
        &mut self.stack
    }

    /// Status snapshot for diagnostics.
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            active_index: self.active_index,
            active_config: self.active_config().name.clone(),
            node_count: self.node_count,
            auth_retries: self.attempt.as_ref().map(|a| a.auth_retries).unwrap_or(0),
            fault: self.fault.as_ref().map(|f| f.status()),
        }
    }

    // ---- state machine -------------------------------------------------

    fn set_state(&mut self, next: ControllerState) {
        if next == self.state {
            return;
        }
        info!("controller: {} -> {}", self.state, next);
        self.stack.record_trace(TraceEvent::StateChange {
            from: self.state.as_str().to_string(),
            to: next.as_str().to_string(),
        });
        self.state = next;
    }

    fn step(&mut self) {
        match self.state {
            ControllerState::Idle | ControllerState::Failed | ControllerState::Degraded => {}
            ControllerState::Initializing => self.initialize(),
            ControllerState::Loading => self.load(),
            ControllerState::Starting => self.start_services(),
            ControllerState::Discovering => self.discover(),
            ControllerState::Up => self.monitor_tick(),
            ControllerState::Recovering => self.recovery_tick(),
        }
    }

    /// Construct environment bindings. Runs on every retry; must stay
    /// idempotent.
    fn initialize(&mut self) {
        self.inbox.clear();
        self.node_count = 0;
        self.discovery_issued = false;
        self.set_state(ControllerState::Loading);
    }

    fn load(&mut self) {
        let retries = self.attempt.as_ref().map(|a| a.auth_retries).unwrap_or(0);
        self.active_index = if self.profile.has_fallbacks() {
            active_config_index(retries, self.profile.default_index, self.profile.len())
        } else {
            self.profile.default_index
        };
        let config = self.profile.config(self.active_index).clone();
        info!(
            "loading configuration {} ('{}'), {} node(s)",
            self.active_index,
            config.name,
            config.node_count()
        );
        self.stack.set_topology(config.nodes.clone());
        match self.attempt.as_mut() {
            Some(attempt) => {
                attempt.config_index = self.active_index;
                attempt.outcome = AttemptOutcome::Pending;
            }
            None => self.attempt = Some(DiscoveryAttempt::new(self.active_index)),
        }
        self.set_state(ControllerState::Starting);
    }

    /// Register both notification classes before any discovery request
    /// so no early fault can be missed; start the sequence trace.
    fn start_services(&mut self) {
        if self.subscriptions.is_empty() {
            let interrupts = Arc::clone(&self.inbox.interrupts_seen);
            let id = self.stack.subscribe(
                NotifyClass::Interrupt,
                Box::new(move |_notification| {
                    *interrupts.lock() += 1;
                }),
            );
            self.subscriptions.push(id);

            let faults = Arc::clone(&self.inbox.faults);
            let id = self.stack.subscribe(
                NotifyClass::PowerFault,
                Box::new(move |notification| {
                    if let Some(event) = notification.fault() {
                        faults.lock().push_back(event);
                    }
                }),
            );
            self.subscriptions.push(id);
        }
        if !self.stack.trace().is_enabled() {
            self.stack.trace_mut().start();
        }
        self.set_state(ControllerState::Discovering);
    }

    fn discover(&mut self) {
        if !self.discovery_issued {
            self.issue_discovery();
            return;
        }
        let result = self.inbox.discovery.lock().take();
        let Some(result) = result else {
            return; // keep ticking until the completion callback fires
        };
        if result.cancelled {
            // teardown reaped the request; payload is meaningless
            return;
        }
        match result.status {
            ResponseStatus::Ok => self.on_discovery_success(),
            ResponseStatus::AuthFailure => self.on_auth_failure(),
            _ => self.on_discovery_failure(),
        }
    }

    fn issue_discovery(&mut self) {
        *self.inbox.discovery.lock() = None;
        let cell = Arc::clone(&self.inbox.discovery);
        let callback = Box::new(move |completion: &Completion| {
            *cell.lock() = Some(DiscoveryResult {
                status: completion.status,
                cancelled: completion.cancelled,
            });
        });
        let config_name = self.active_config().name.clone();
        match self
            .stack
            .send_request(NodeAddr::Master, Opcode::Discover, Vec::new(), callback)
        {
            Ok(token) => {
                info!("discovery issued ({}) against '{}'", token, config_name);
                self.stack
                    .record_trace(TraceEvent::DiscoveryStarted {
                        config: config_name,
                    });
                self.discovery_issued = true;
            }
            Err(err) => {
                error!("failed to issue discovery: {}", err);
                self.attempt = None;
                self.set_state(ControllerState::Failed);
            }
        }
    }

    fn on_discovery_success(&mut self) {
        self.node_count = self.stack.node_count();
        info!("segment up: {} node(s)", self.node_count);
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.outcome = AttemptOutcome::Succeeded;
        }
        self.attempt = None;
        // a successful discovery clears fault state and retry counters
        self.fault = None;
        self.monitor_ticks = 0;
        if self.active_config().line_diagnostics {
            self.arm_error_reset_timer();
        }
        self.set_state(ControllerState::Up);
    }

    fn on_auth_failure(&mut self) {
        let retries = match self.attempt.as_mut() {
            Some(attempt) => {
                attempt.outcome = AttemptOutcome::Failed(FailureClass::Authentication);
                attempt.auth_retries += 1;
                attempt.auth_retries
            }
            None => 1,
        };
        if self.profile.has_fallbacks() && (retries as usize) < self.profile.len() {
            warn!(
                "authentication failed on configuration {}, trying next fallback",
                self.active_index
            );
            self.discovery_issued = false;
            self.set_state(ControllerState::Loading);
        } else {
            error!("authentication failed on every configuration");
            self.attempt = None;
            self.set_state(ControllerState::Failed);
        }
    }

    fn on_discovery_failure(&mut self) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.outcome = AttemptOutcome::Failed(FailureClass::Other);
        }
        match self.fault.as_mut() {
            // rediscovery after a fault: retry while budget remains
            Some(fault) if !fault.exhausted() => {
                fault.retry_pending = true;
                warn!(
                    "post-fault rediscovery failed (attempt {}/{})",
                    fault.attempts, fault.max_attempts
                );
                self.set_state(ControllerState::Recovering);
            }
            _ => {
                error!("discovery failed, no retry budget left");
                self.fault = None;
                self.attempt = None;
                self.set_state(ControllerState::Failed);
            }
        }
    }

    // ---- recovery ------------------------------------------------------

    pub(crate) fn enter_recovering(&mut self, event: FaultEvent) {
        warn!("fault observed: {}", event);
        self.stack.record_trace(TraceEvent::FaultRecorded(event));
        match self.fault.as_mut() {
            Some(fault) => {
                // keep the attempt counters; refresh the classification
                fault.node = event.node;
                fault.kind = event.kind;
                fault.retry_pending = true;
            }
            None => {
                let budget = self.active_config().fault_retry_limit;
                self.fault = Some(FaultRecord::new(event, budget));
            }
        }
        self.set_state(ControllerState::Recovering);
    }

    fn recovery_tick(&mut self) {
        let (pending, exhausted) = match self.fault.as_ref() {
            Some(fault) => (fault.retry_pending, fault.exhausted()),
            None => {
                error!("recovering without a fault record");
                self.set_state(ControllerState::Failed);
                return;
            }
        };
        if !pending {
            return;
        }
        if exhausted {
            error!("fault retry budget exhausted; running degraded");
            self.resume_at_ns = None;
            self.set_state(ControllerState::Degraded);
            return;
        }

        let now = self.stack.now_ns();
        match self.resume_at_ns {
            None => {
                let delay_ms = self.active_config().retry_delay_ms;
                self.resume_at_ns = Some(now + delay_ms.saturating_mul(1_000_000));
                info!("rediscovery in {} ms", delay_ms);
            }
            Some(resume_at) if now >= resume_at => {
                self.resume_at_ns = None;
                self.teardown();
                if let Some(fault) = self.fault.as_mut() {
                    fault.begin_attempt();
                }
                self.set_state(ControllerState::Initializing);
            }
            Some(_) => {}
        }
    }

    /// Full teardown: unregister notifications, stop the sequence
    /// trace, free controller timers, cancel everything in flight and
    /// close all bindings.
    fn teardown(&mut self) {
        for id in self.subscriptions.drain(..) {
            if let Err(err) = self.stack.unsubscribe(id) {
                error!("unsubscribe failed: {}", err);
            }
        }
        if let Some(timer) = self.error_timer.take() {
            if let Err(err) = self.stack.release_external_timer(timer) {
                error!("releasing error-reset timer failed: {}", err);
            }
        }
        self.stack.teardown_segment();
        self.stack.trace_mut().stop();
        self.inbox.clear();
        self.node_count = 0;
        self.discovery_issued = false;
    }

    // ---- diagnostics timer ---------------------------------------------

    fn arm_error_reset_timer(&mut self) {
        if self.error_timer.is_some() {
            return;
        }
        let due = Arc::clone(&self.inbox.error_reset_due);
        let timer = match self
            .stack
            .alloc_external_timer(Box::new(move || *due.lock() = true))
        {
            Ok(timer) => timer,
            Err(err) => {
                warn!("line diagnostics disabled: {}", err);
                return;
            }
        };
        let period =
            std::time::Duration::from_millis(self.active_config().error_reset_interval_ms);
        if let Err(err) = self.stack.arm_periodic(timer, period) {
            warn!("line diagnostics disabled: {}", err);
            let _ = self.stack.release_external_timer(timer);
            return;
        }
        self.error_timer = Some(timer);
    }

    pub(crate) fn take_fault_event(&mut self) -> Option<FaultEvent> {
        self.inbox.faults.lock().pop_front()
    }

    pub(crate) fn error_reset_due(&mut self) -> bool {
        let mut due = self.inbox.error_reset_due.lock();
        std::mem::take(&mut *due)
    }

    pub(crate) fn bump_monitor_tick(&mut self) -> u64 {
        self.monitor_ticks += 1;
        self.monitor_ticks
    }
}
