//! Handoff lifecycle.
//!
//! [`HandoffCoordinator`] composes the arbitration gate, the recovery
//! controller, the cadence classifier, the warmup gate and the safety net
//! into one object. It installs six callbacks into a [`TickSchedule`]:
//!
//! | priority | label           | work                                          |
//! |----------|-----------------|-----------------------------------------------|
//! | -20      | `warmup-probe`  | feeds the warmup gate                         |
//! | 0        | `arbiter`       | applies a queued transfer                     |
//! | 10       | `host-slot`     | host renders if it owns the tick              |
//! | 20       | `receiver-slot` | receiver renders if it owns the tick          |
//! | 30       | `cadence-probe` | classifies the interval, re-arms on throttle  |
//! | 40       | `monitor`       | safety-net release, retry after recovery      |
//!
//! Stall detection does not run on ticks; the embedder calls
//! [`HandoffCoordinator::poll`] from a wall-clock timer.
//!
//! The coordinator is a cheap `Rc` handle. Observer hooks are queued while
//! internal state is borrowed and delivered afterwards, so an observer may
//! call back into the coordinator. Producers are invoked with the state
//! borrow released while rendering, but lifecycle calls (`activate`,
//! `on_transfer_accepted`, ...) happen inside it and must not re-enter.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use log::Level;

use crate::cadence::{CadenceClassifier, CadenceEvent, CadenceStatus};
use crate::config::HandoffConfig;
use crate::diagnostics::DiagnosticsLog;
use crate::error::{ConfigError, StartError, TransferRejection};
use crate::gate::{ArbitrationGate, OwnershipChange};
use crate::owner::{Owner, Phase, PhaseLog, PhaseTransition};
use crate::producer::{SharedHost, SharedReceiver, TransferConditions};
use crate::recovery::{RecoveryAction, RecoveryController, RecoveryState, RecoveryTransition};
use crate::safety_net::{ReleaseReason, SafetyNet, SafetyNetState};
use crate::schedule::{CallbackId, TickInfo, TickSchedule, priority};
use crate::warmup::{WarmupGate, WarmupOutcome, WarmupState, WarmupWait};

/// Lifecycle observer. Every hook defaults to a no-op.
pub trait HandoffEvents {
    fn on_phase_changed(&mut self, _transition: &PhaseTransition) {}

    fn on_transfer_completed(&mut self, _change: &OwnershipChange) {}

    /// Ownership was forced back to the host after a stall.
    fn on_recovery_start(&mut self, _attempt: u32) {}

    /// The first frame after a forced reclaim was produced.
    fn on_recovered(&mut self, _attempt: u32) {}

    /// Retries exhausted. Nothing further happens until `reset_recovery`.
    fn on_degraded(&mut self, _attempts: u32) {}

    fn on_throttle_detected(&mut self, _status: CadenceStatus) {}

    fn on_stabilized(&mut self) {}

    fn on_warmup_complete(&mut self, _outcome: WarmupOutcome) {}

    fn on_safety_net_released(&mut self, _reason: ReleaseReason) {}
}

#[derive(Debug)]
enum Notice {
    Phase(PhaseTransition),
    Transfer(OwnershipChange),
    RecoveryStart(u32),
    Recovered(u32),
    Degraded(u32),
    Throttle(CadenceStatus),
    Stabilized,
    Warmup(WarmupOutcome),
    SafetyNetReleased(ReleaseReason),
}

impl Notice {
    fn deliver(&self, events: &mut dyn HandoffEvents) {
        match self {
            Notice::Phase(t) => events.on_phase_changed(t),
            Notice::Transfer(c) => events.on_transfer_completed(c),
            Notice::RecoveryStart(a) => events.on_recovery_start(*a),
            Notice::Recovered(a) => events.on_recovered(*a),
            Notice::Degraded(a) => events.on_degraded(*a),
            Notice::Throttle(s) => events.on_throttle_detected(*s),
            Notice::Stabilized => events.on_stabilized(),
            Notice::Warmup(o) => events.on_warmup_complete(*o),
            Notice::SafetyNetReleased(r) => events.on_safety_net_released(*r),
        }
    }
}

/// Point-in-time view of the coordinator, for overlays and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffSnapshot {
    pub phase: Phase,
    pub owner: Owner,
    /// Target of the queued transfer, if any.
    pub pending: Option<Owner>,
    pub recovery: RecoveryState,
    pub recovery_attempts: u32,
    pub cadence: CadenceStatus,
    pub average_interval_ms: f64,
    pub consecutive_healthy: u32,
    pub warmup: WarmupState,
    pub safety_net: SafetyNetState,
    pub transfers: u64,
    pub last_tick: Option<u64>,
}

impl fmt::Display for HandoffSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | owner {} | {} {:.1} ms | recovery {}",
            self.phase, self.owner, self.cadence, self.average_interval_ms, self.recovery
        )?;
        if self.recovery_attempts > 0 {
            write!(f, " ({})", self.recovery_attempts)?;
        }
        Ok(())
    }
}

struct Inner {
    config: HandoffConfig,
    gate: ArbitrationGate,
    recovery: RecoveryController,
    cadence: CadenceClassifier,
    warmup: WarmupGate,
    safety_net: SafetyNet,
    phases: PhaseLog,
    diagnostics: DiagnosticsLog,

    callbacks: Vec<CallbackId>,
    /// Owner the cadence window was collected under.
    cadence_owner: Owner,
    /// Re-request the handoff once recovery relaxes.
    retry_armed: bool,
    stopped: bool,
    last_tick: Option<u64>,
    receiver_produced_tick: Option<u64>,
    /// Latest timestamp seen from a tick, a poll or a lifecycle call.
    clock: Option<Instant>,

    notices: Vec<Notice>,
}

impl Inner {
    fn observe(&mut self, now: Instant) {
        self.clock = Some(self.clock.map_or(now, |c| c.max(now)));
    }

    fn now(&self) -> Instant {
        self.clock.unwrap_or_else(Instant::now)
    }

    fn note(&self, level: Level, at: Instant, message: impl Into<String>) {
        self.diagnostics.record(level, at, self.last_tick, message);
    }

    fn set_phase(&mut self, to: Phase, at: Instant, reason: &str) {
        if let Some(t) = self.phases.transition(to, at, self.last_tick, reason) {
            self.note(Level::Info, at, format!("phase {} -> {} ({reason})", t.from, t.to));
            self.notices.push(Notice::Phase(t));
        }
    }

    fn start(&mut self, now: Instant) -> Result<(), StartError> {
        if self.stopped {
            return Err(StartError::Stopped);
        }
        if self.gate.is_started() {
            return Err(StartError::AlreadyStarted);
        }
        if self.gate.host().is_none() {
            return Err(StartError::NoHost);
        }
        if self.warmup.state() == WarmupState::WarmingUp {
            return Err(StartError::WarmupPending);
        }

        self.gate.set_initial_owner(Owner::Host).map_err(StartError::Rejected)?;
        self.observe(now);
        self.recovery.note_ownership(Owner::Host, now);
        self.set_phase(Phase::Begin, now, "started");
        self.set_phase(Phase::LoadingActive, now, "host owns the tick");
        Ok(())
    }

    fn apply_change(&mut self, change: OwnershipChange, at: Instant) {
        self.note(
            Level::Info,
            at,
            format!(
                "ownership {} -> {}{}",
                change.from,
                change.to,
                if change.forced { " (forced)" } else { "" }
            ),
        );
        self.notices.push(Notice::Transfer(change));
        self.recovery.note_ownership(change.to, at);

        match change.to {
            Owner::Receiver => {
                self.safety_net.arm(at);
                self.retry_armed = false;
                self.set_phase(Phase::Active, at, "receiver owns the tick");
            }
            Owner::Host => {
                self.safety_net.disarm();
                if !change.forced {
                    self.set_phase(Phase::LoadingActive, at, "host owns the tick");
                }
            }
            Owner::None => {}
        }
    }

    fn frame_produced(&mut self, at: Instant) {
        if self.recovery.note_frame(at) {
            let attempt = self.recovery.attempts();
            self.note(Level::Info, at, format!("recovered after attempt {attempt}"));
            self.notices.push(Notice::Recovered(attempt));
        }
    }

    fn warmup_opened(&mut self, outcome: WarmupOutcome, at: Instant) {
        let level = if outcome.is_degraded() { Level::Warn } else { Level::Info };
        self.note(level, at, format!("warmup open ({outcome:?})"));
        self.notices.push(Notice::Warmup(outcome));
    }

    fn queue_transfer(&mut self, target: Owner, conditions: TransferConditions) -> Result<(), TransferRejection> {
        let at = self.now();
        match self.gate.try_request_transfer(target, conditions) {
            Ok(()) => {
                self.note(Level::Debug, at, format!("transfer to {target} queued"));
                self.set_phase(Phase::Transferring, at, "transfer requested");
                Ok(())
            }
            Err(reason) => {
                self.note(Level::Debug, at, format!("transfer to {target} rejected: {reason}"));
                Err(reason)
            }
        }
    }

    fn run_recovery(&mut self, now: Instant) {
        let owner = self.gate.current_owner();
        match self.recovery.poll(now, owner) {
            RecoveryAction::None => {}
            RecoveryAction::Reclaim { attempt, stalled_for } => {
                self.note(
                    Level::Warn,
                    now,
                    format!(
                        "receiver stalled for {stalled_for:?}; reclaiming for host (attempt {attempt}/{})",
                        self.config.max_recovery_retries
                    ),
                );
                let Some(change) = self.gate.force_transfer(Owner::Host) else {
                    let attempts = self.recovery.reclaim_failed(now);
                    self.note(
                        Level::Error,
                        now,
                        "host cannot take the tick back; recovery degraded",
                    );
                    self.retry_armed = false;
                    self.notices.push(Notice::Degraded(attempts));
                    return;
                };
                self.set_phase(Phase::EmergencyRecovery, now, "receiver stalled");
                self.apply_change(change, now);
                self.retry_armed = self.config.retry_transfer_after_recovery;
                self.notices.push(Notice::RecoveryStart(attempt));
            }
            RecoveryAction::Degraded { attempts } => {
                self.note(
                    Level::Error,
                    now,
                    format!("receiver stalled {attempts} times; recovery degraded, automatic reclaim stopped"),
                );
                self.retry_armed = false;
                self.notices.push(Notice::Degraded(attempts));
            }
            RecoveryAction::Relaxed => {
                self.note(Level::Info, now, "recovery grace elapsed; monitoring");
                if self.phases.current() == Phase::EmergencyRecovery {
                    self.set_phase(Phase::LoadingActive, now, "recovered");
                }
            }
        }
    }
}

struct Shared {
    inner: RefCell<Inner>,
    events: RefCell<Option<Box<dyn HandoffEvents>>>,
}

/// Cloneable handle to one handoff lifecycle.
#[derive(Clone)]
pub struct HandoffCoordinator(Rc<Shared>);

impl HandoffCoordinator {
    /// Validates `config` and builds an idle coordinator writing to `diagnostics`.
    pub fn new(config: HandoffConfig, diagnostics: DiagnosticsLog) -> Result<Self, ConfigError> {
        config.validate()?;
        diagnostics.set_debug(config.debug_logging);

        let inner = Inner {
            gate: ArbitrationGate::new(),
            recovery: RecoveryController::new(config.recovery_settings()),
            cadence: CadenceClassifier::new(config.cadence),
            warmup: WarmupGate::new(config.warmup_settings()),
            safety_net: SafetyNet::new(config.safety_net_settings()),
            phases: PhaseLog::default(),
            diagnostics,
            callbacks: Vec::new(),
            cadence_owner: Owner::None,
            retry_armed: false,
            stopped: false,
            last_tick: None,
            receiver_produced_tick: None,
            clock: None,
            notices: Vec::new(),
            config,
        };

        Ok(Self(Rc::new(Shared {
            inner: RefCell::new(inner),
            events: RefCell::new(None),
        })))
    }

    /// Like [`new`](Self::new) with a fresh diagnostics log of `diagnostics_capacity` lines.
    pub fn with_config(config: HandoffConfig) -> Result<Self, ConfigError> {
        let diagnostics = DiagnosticsLog::new(config.diagnostics_capacity);
        Self::new(config, diagnostics)
    }

    // ── wiring ────────────────────────────────────────────────────────────

    pub fn register_host(&self, host: SharedHost) {
        let id = host.borrow().id().to_string();
        let mut inner = self.0.inner.borrow_mut();
        let at = inner.now();
        match inner.gate.register_host(host) {
            Some(old) => inner.note(
                Level::Info,
                at,
                format!("host `{}` replaced by `{id}`", old.borrow().id()),
            ),
            None => inner.note(Level::Debug, at, format!("host `{id}` registered")),
        }
    }

    pub fn register_receiver(&self, receiver: SharedReceiver) {
        let id = receiver.borrow().id().to_string();
        let mut inner = self.0.inner.borrow_mut();
        let at = inner.now();
        match inner.gate.register_receiver(receiver) {
            Some(old) => inner.note(
                Level::Info,
                at,
                format!("receiver `{}` replaced by `{id}`", old.borrow().id()),
            ),
            None => inner.note(Level::Debug, at, format!("receiver `{id}` registered")),
        }
    }

    /// Installs the observer, replacing any previous one.
    ///
    /// Must not be called from inside an observer hook.
    pub fn set_events(&self, events: impl HandoffEvents + 'static) {
        *self.0.events.borrow_mut() = Some(Box::new(events));
    }

    /// Registers the per-tick callbacks. Calling it again is a no-op.
    pub fn install(&self, schedule: &mut TickSchedule) {
        {
            let inner = self.0.inner.borrow();
            if inner.stopped || !inner.callbacks.is_empty() {
                log::debug!("handoff callbacks not installed: already installed or stopped");
                return;
            }
        }

        let ids = vec![
            self.hook(schedule, priority::WARMUP_PROBE, "warmup-probe", Self::warmup_probe),
            self.hook(schedule, priority::ARBITER, "arbiter", Self::arbiter),
            self.hook(schedule, priority::HOST_SLOT, "host-slot", Self::host_slot),
            self.hook(schedule, priority::RECEIVER_SLOT, "receiver-slot", Self::receiver_slot),
            self.hook(schedule, priority::CADENCE_PROBE, "cadence-probe", Self::cadence_probe),
            self.hook(schedule, priority::MONITOR, "monitor", Self::monitor),
        ];
        self.0.inner.borrow_mut().callbacks = ids;
    }

    pub fn is_installed(&self) -> bool {
        !self.0.inner.borrow().callbacks.is_empty()
    }

    fn hook(
        &self,
        schedule: &mut TickSchedule,
        priority: i32,
        label: &'static str,
        step: fn(&Self, &TickInfo),
    ) -> CallbackId {
        let this = self.clone();
        schedule.register(priority, label, move |tick| step(&this, tick))
    }

    // ── warmup ────────────────────────────────────────────────────────────

    /// Starts the warmup gate. `false` if it already began or the coordinator stopped.
    pub fn begin_warmup(&self, now: Instant) -> bool {
        let mut inner = self.0.inner.borrow_mut();
        if inner.stopped {
            return false;
        }
        inner.observe(now);
        let begun = inner.warmup.begin(now);
        if begun {
            let msg = format!(
                "warmup started: {} ticks at or below {:?}, timeout {:?}",
                inner.config.warmup_stable_frames,
                inner.config.warmup_healthy_threshold,
                inner.config.warmup_timeout
            );
            inner.note(Level::Info, now, msg);
        }
        begun
    }

    /// Future resolving once warmup opens.
    pub fn warmup_wait(&self) -> WarmupWait {
        self.0.inner.borrow().warmup.wait()
    }

    /// Opens the warmup gate now. `None` if it was already open.
    pub fn force_open_warmup(&self) -> Option<WarmupOutcome> {
        let outcome = {
            let mut inner = self.0.inner.borrow_mut();
            let outcome = inner.warmup.force_open();
            if let Some(outcome) = outcome {
                let at = inner.now();
                inner.warmup_opened(outcome, at);
            }
            outcome
        };
        self.flush();
        outcome
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Gives the host the tick. Requires a registered host and an open (or
    /// never begun) warmup gate.
    pub fn start(&self, now: Instant) -> Result<(), StartError> {
        let result = self.0.inner.borrow_mut().start(now);
        if let Err(e) = &result {
            log::warn!("handoff start refused: {e}");
        }
        self.flush();
        result
    }

    /// Queues a transfer for the next tick. `false` means nothing changed.
    pub fn request_transfer(&self, target: Owner, conditions: TransferConditions) -> bool {
        self.try_request_transfer(target, conditions).is_ok()
    }

    /// Like [`request_transfer`](Self::request_transfer) but says why.
    pub fn try_request_transfer(
        &self,
        target: Owner,
        conditions: TransferConditions,
    ) -> Result<(), TransferRejection> {
        let result = self.0.inner.borrow_mut().queue_transfer(target, conditions);
        self.flush();
        result
    }

    /// Asks the receiver for its readiness, overlays the measured cadence and
    /// requests the handoff to it.
    pub fn request_handoff(&self) -> bool {
        let (receiver, (healthy, stable)) = {
            let inner = self.0.inner.borrow();
            (inner.gate.receiver().cloned(), inner.cadence.conditions_hint())
        };
        let Some(receiver) = receiver else {
            log::debug!("handoff requested without a receiver");
            return false;
        };
        let conditions = receiver.borrow().can_accept_transfer().with_cadence(healthy, stable);
        self.request_transfer(Owner::Receiver, conditions)
    }

    /// Wall-clock poll: warmup timeout and stall detection.
    ///
    /// Call at least every `stall_poll_interval`, independently of ticks.
    pub fn poll(&self, now: Instant) {
        {
            let mut inner = self.0.inner.borrow_mut();
            if inner.stopped {
                return;
            }
            inner.observe(now);
            if let Some(outcome) = inner.warmup.check_timeout(now) {
                inner.warmup_opened(outcome, now);
            }
            if inner.gate.is_started() {
                inner.run_recovery(now);
            }
        }
        self.flush();
    }

    /// When the next stall poll is due. `None` before the first poll or after stop.
    pub fn next_poll_at(&self) -> Option<Instant> {
        let inner = self.0.inner.borrow();
        if inner.stopped {
            return None;
        }
        inner.recovery.next_poll_at()
    }

    /// Records a frame produced outside the installed slots.
    pub fn report_frame(&self, now: Instant) {
        {
            let mut inner = self.0.inner.borrow_mut();
            if inner.stopped {
                return;
            }
            inner.observe(now);
            inner.frame_produced(now);
        }
        self.flush();
    }

    /// Brings the host back up if it was released.
    pub fn show(&self) {
        let host = {
            let inner = self.0.inner.borrow();
            if inner.stopped {
                return;
            }
            inner.gate.host().cloned()
        };
        if let Some(host) = host {
            let mut host = host.borrow_mut();
            if !host.is_active() && !host.activate() {
                log::warn!("host `{}` could not be shown", host.id());
            }
        }
    }

    /// Releases the host unless it currently owns the tick.
    pub fn hide(&self) {
        let host = {
            let mut inner = self.0.inner.borrow_mut();
            if inner.stopped {
                return;
            }
            if inner.gate.current_owner() == Owner::Host {
                let at = inner.now();
                inner.note(Level::Debug, at, "hide ignored: host owns the tick");
                return;
            }
            inner.safety_net.disarm();
            inner.gate.host().cloned()
        };
        if let Some(host) = host {
            let mut host = host.borrow_mut();
            if host.is_active() {
                host.deactivate();
            }
        }
    }

    /// Unregisters the callbacks, drops any pending request and disposes the
    /// host. A stopped coordinator cannot be restarted.
    pub fn stop(&self, schedule: &mut TickSchedule, now: Instant) {
        let host = {
            let mut inner = self.0.inner.borrow_mut();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.observe(now);

            for id in std::mem::take(&mut inner.callbacks) {
                schedule.unregister(id);
            }
            inner.gate.clear();
            inner.safety_net.disarm();
            inner.retry_armed = false;

            // Nobody waits forever on a gate that will never tick again.
            if inner.warmup.state() == WarmupState::WarmingUp {
                if let Some(outcome) = inner.warmup.force_open() {
                    inner.warmup_opened(outcome, now);
                }
            }

            inner.set_phase(Phase::End, now, "stopped");
            inner.gate.host().cloned()
        };
        if let Some(host) = host {
            host.borrow_mut().dispose();
        }
        self.flush();
    }

    /// Clears the recovery state, including `Degraded`.
    pub fn reset_recovery(&self, now: Instant) {
        let mut inner = self.0.inner.borrow_mut();
        inner.observe(now);
        let was = inner.recovery.state();
        inner.recovery.reset(now);
        let owner = inner.gate.current_owner();
        inner.recovery.note_ownership(owner, now);
        inner.note(Level::Info, now, format!("recovery reset (was {was})"));
    }

    // ── per-tick steps ────────────────────────────────────────────────────

    fn warmup_probe(&self, tick: &TickInfo) {
        {
            let mut inner = self.0.inner.borrow_mut();
            inner.last_tick = Some(tick.index);
            inner.gate.begin_tick(tick.index);
            inner.observe(tick.now);
            if let Some(outcome) = inner.warmup.on_tick(tick) {
                inner.warmup_opened(outcome, tick.now);
            }
        }
        self.flush();
    }

    fn arbiter(&self, tick: &TickInfo) {
        {
            let mut inner = self.0.inner.borrow_mut();
            if let Some(change) = inner.gate.arbitrate(tick) {
                inner.apply_change(change, tick.now);
            }
        }
        self.flush();
    }

    fn host_slot(&self, tick: &TickInfo) {
        let Some(host) = self.0.inner.borrow().gate.host_slot() else {
            return;
        };
        host.borrow_mut().render_tick(tick);
        self.0.inner.borrow_mut().frame_produced(tick.now);
        self.flush();
    }

    fn receiver_slot(&self, tick: &TickInfo) {
        let Some(receiver) = self.0.inner.borrow().gate.receiver_slot() else {
            return;
        };
        let produced = receiver.borrow_mut().report_tick_rendered(tick);
        {
            let mut inner = self.0.inner.borrow_mut();
            if produced {
                inner.receiver_produced_tick = Some(tick.index);
                inner.frame_produced(tick.now);
            } else {
                inner.note(Level::Debug, tick.now, "receiver produced no frame");
            }
        }
        self.flush();
    }

    fn cadence_probe(&self, tick: &TickInfo) {
        let rewarm = {
            let mut inner = self.0.inner.borrow_mut();
            let owner = inner.gate.current_owner();
            if owner != inner.cadence_owner {
                inner.cadence.reset();
                inner.cadence_owner = owner;
            }
            let Some(interval) = tick.interval else {
                return;
            };

            match inner.cadence.record(interval) {
                Some(CadenceEvent::ThrottleDetected(status)) => {
                    let msg = format!(
                        "cadence {status}: recent average {:.1} ms",
                        inner.cadence.recent_average_ms()
                    );
                    inner.note(Level::Warn, tick.now, msg);
                    inner.notices.push(Notice::Throttle(status));

                    if owner == Owner::Receiver {
                        inner.note(Level::Info, tick.now, "safety net re-armed");
                        inner.safety_net.arm(tick.now);
                        inner.gate.host().cloned()
                    } else {
                        None
                    }
                }
                Some(CadenceEvent::Stabilized) => {
                    inner.note(Level::Info, tick.now, "cadence stable");
                    inner.notices.push(Notice::Stabilized);
                    None
                }
                None => None,
            }
        };

        if let Some(host) = rewarm {
            let mut host = host.borrow_mut();
            if !host.is_active() && !host.activate() {
                log::warn!("host `{}` could not be re-warmed", host.id());
            }
        }
        self.flush();
    }

    fn monitor(&self, tick: &TickInfo) {
        let (release, retry) = {
            let mut inner = self.0.inner.borrow_mut();
            let owner = inner.gate.current_owner();
            let produced = inner.receiver_produced_tick == Some(tick.index);

            let mut release = None;
            if let Some(reason) = inner.safety_net.on_tick(tick, owner, produced) {
                inner.note(Level::Info, tick.now, format!("safety net released ({reason:?})"));
                inner.notices.push(Notice::SafetyNetReleased(reason));
                if reason == ReleaseReason::Stable {
                    inner.recovery.reset_attempts();
                }
                release = inner.gate.host().cloned();
            }

            let mut retry = None;
            if inner.retry_armed
                && owner == Owner::Host
                && inner.recovery.state() == RecoveryState::Monitoring
                && inner.gate.pending_request().is_none()
            {
                if let Some(receiver) = inner.gate.receiver().cloned() {
                    retry = Some((receiver, inner.cadence.conditions_hint()));
                }
            }
            (release, retry)
        };

        if let Some(host) = release {
            let mut host = host.borrow_mut();
            if host.is_active() {
                host.deactivate();
            }
        }

        if let Some((receiver, (healthy, stable))) = retry {
            let conditions = receiver.borrow().can_accept_transfer().with_cadence(healthy, stable);
            if conditions.is_satisfied() && self.request_transfer(Owner::Receiver, conditions) {
                let inner = self.0.inner.borrow();
                inner.note(Level::Info, tick.now, "retrying handoff after recovery");
            }
        }
        self.flush();
    }

    /// Delivers queued notices with every state borrow released.
    fn flush(&self) {
        loop {
            let notices = std::mem::take(&mut self.0.inner.borrow_mut().notices);
            if notices.is_empty() {
                return;
            }

            let Ok(mut events) = self.0.events.try_borrow_mut() else {
                // Re-entered from an observer; the outer flush delivers these.
                let mut inner = self.0.inner.borrow_mut();
                let later = std::mem::replace(&mut inner.notices, notices);
                inner.notices.extend(later);
                return;
            };
            let Some(sink) = events.as_mut() else {
                return;
            };
            for notice in &notices {
                notice.deliver(&mut **sink);
            }
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────

    pub fn current_owner(&self) -> Owner {
        self.0.inner.borrow().gate.current_owner()
    }

    pub fn phase(&self) -> Phase {
        self.0.inner.borrow().phases.current()
    }

    /// Recorded phase changes, oldest first.
    pub fn phase_log(&self) -> Vec<PhaseTransition> {
        self.0.inner.borrow().phases.entries().cloned().collect()
    }

    pub fn phase_path(&self) -> Vec<Phase> {
        self.0.inner.borrow().phases.path()
    }

    pub fn is_started(&self) -> bool {
        self.0.inner.borrow().gate.is_started()
    }

    pub fn is_stopped(&self) -> bool {
        self.0.inner.borrow().stopped
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.0.inner.borrow().recovery.state()
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.0.inner.borrow().recovery.attempts()
    }

    pub fn recovery_history(&self) -> Vec<RecoveryTransition> {
        self.0.inner.borrow().recovery.history().copied().collect()
    }

    pub fn cadence_status(&self) -> CadenceStatus {
        self.0.inner.borrow().cadence.status()
    }

    pub fn warmup_state(&self) -> WarmupState {
        self.0.inner.borrow().warmup.state()
    }

    pub fn safety_net_state(&self) -> SafetyNetState {
        self.0.inner.borrow().safety_net.state()
    }

    pub fn diagnostics(&self) -> DiagnosticsLog {
        self.0.inner.borrow().diagnostics.clone()
    }

    pub fn config(&self) -> HandoffConfig {
        self.0.inner.borrow().config.clone()
    }

    pub fn snapshot(&self) -> HandoffSnapshot {
        let inner = self.0.inner.borrow();
        HandoffSnapshot {
            phase: inner.phases.current(),
            owner: inner.gate.current_owner(),
            pending: inner.gate.pending_request().map(|r| r.target),
            recovery: inner.recovery.state(),
            recovery_attempts: inner.recovery.attempts(),
            cadence: inner.cadence.status(),
            average_interval_ms: inner.cadence.average_ms(),
            consecutive_healthy: inner.cadence.consecutive_healthy_frames(),
            warmup: inner.warmup.state(),
            safety_net: inner.safety_net.state(),
            transfers: inner.gate.transfers(),
            last_tick: inner.last_tick,
        }
    }
}

impl fmt::Debug for HandoffCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("HandoffCoordinator")
                .field("phase", &inner.phases.current())
                .field("gate", &inner.gate)
                .field("recovery", &inner.recovery.state())
                .field("cadence", &inner.cadence.status())
                .field("warmup", &inner.warmup.state())
                .field("safety_net", &inner.safety_net.state())
                .finish(),
            Err(_) => f.write_str("HandoffCoordinator { <borrowed> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventLog, Rig};

    // ── construction & wiring ─────────────────────────────────────────────

    #[test]
    fn invalid_config_is_rejected() {
        let config = HandoffConfig { max_recovery_retries: 0, ..Default::default() };
        let err = HandoffCoordinator::with_config(config).unwrap_err();
        assert_eq!(err.field, "max_recovery_retries");
    }

    #[test]
    fn install_registers_six_steps_in_order_once() {
        let mut rig = Rig::new(HandoffConfig::default());
        assert!(rig.coordinator.is_installed());
        rig.coordinator.install(&mut rig.schedule);
        assert_eq!(
            rig.schedule.labels().collect::<Vec<_>>(),
            vec!["warmup-probe", "arbiter", "host-slot", "receiver-slot", "cadence-probe", "monitor"]
        );
    }

    #[test]
    fn start_without_host_fails() {
        let coordinator = HandoffCoordinator::with_config(HandoffConfig::default()).unwrap();
        assert_eq!(coordinator.start(Instant::now()), Err(StartError::NoHost));
        assert_eq!(coordinator.phase(), Phase::Dormant);
    }

    #[test]
    fn start_twice_fails() {
        let rig = Rig::started(HandoffConfig::default());
        assert_eq!(rig.coordinator.start(rig.now()), Err(StartError::AlreadyStarted));
    }

    #[test]
    fn start_walks_begin_to_loading_active() {
        let rig = Rig::started(HandoffConfig::default());
        assert_eq!(
            rig.coordinator.phase_path(),
            vec![Phase::Dormant, Phase::Begin, Phase::LoadingActive]
        );
        assert_eq!(rig.coordinator.current_owner(), Owner::Host);
        assert!(rig.host.borrow().active);
    }

    #[test]
    fn host_that_cannot_activate_is_rejected() {
        let rig = Rig::new(HandoffConfig::default());
        rig.host.borrow_mut().provide = false;
        assert_eq!(
            rig.coordinator.start(rig.now()),
            Err(StartError::Rejected(TransferRejection::HostUnavailable))
        );
        assert!(!rig.coordinator.is_started());
    }

    // ── handoff requests ──────────────────────────────────────────────────

    #[test]
    fn request_handoff_waits_for_stable_cadence() {
        let mut rig = Rig::started(HandoffConfig::default());
        rig.run(16, 3);
        assert!(!rig.coordinator.request_handoff());

        rig.run(16, 10);
        assert!(rig.coordinator.request_handoff());
        assert_eq!(rig.coordinator.phase(), Phase::Transferring);
        rig.run(16, 1);
        assert_eq!(rig.coordinator.current_owner(), Owner::Receiver);
        assert_eq!(rig.coordinator.phase(), Phase::Active);
    }

    #[test]
    fn request_handoff_respects_receiver_flags() {
        let mut rig = Rig::started(HandoffConfig::default());
        rig.run(16, 15);
        rig.receiver.borrow_mut().conditions.projection_ready = false;
        assert!(!rig.coordinator.request_handoff());
        assert_eq!(rig.coordinator.snapshot().pending, None);
    }

    // ── observers ─────────────────────────────────────────────────────────

    #[test]
    fn observer_sees_phases_and_transfers_in_order() {
        let mut rig = Rig::new(HandoffConfig::default());
        let events = EventLog::default();
        rig.coordinator.set_events(events.clone());

        rig.coordinator.start(rig.now()).unwrap();
        rig.coordinator.request_transfer(Owner::Receiver, TransferConditions::all_met());
        rig.run(16, 1);

        assert_eq!(
            events.names(),
            vec![
                "phase:begin",
                "phase:loading-active",
                "phase:transferring",
                "transfer:host->receiver",
                "phase:active",
            ]
        );
    }

    struct Reentrant {
        coordinator: HandoffCoordinator,
        owners: Rc<RefCell<Vec<Owner>>>,
    }

    impl HandoffEvents for Reentrant {
        fn on_transfer_completed(&mut self, _change: &OwnershipChange) {
            self.owners.borrow_mut().push(self.coordinator.current_owner());
            // Hand straight back; queued notices from here arrive after this hook.
            self.coordinator.request_transfer(Owner::Host, TransferConditions::all_met());
        }
    }

    #[test]
    fn observer_may_call_back_into_the_coordinator() {
        let mut rig = Rig::started(HandoffConfig::default());
        let owners = Rc::new(RefCell::new(Vec::new()));
        rig.coordinator.set_events(Reentrant {
            coordinator: rig.coordinator.clone(),
            owners: owners.clone(),
        });

        rig.coordinator.request_transfer(Owner::Receiver, TransferConditions::all_met());
        rig.run(16, 1);
        assert_eq!(*owners.borrow(), vec![Owner::Receiver]);
        assert_eq!(rig.coordinator.snapshot().pending, Some(Owner::Host));

        rig.run(16, 1);
        assert_eq!(rig.coordinator.current_owner(), Owner::Host);
    }

    // ── hooks ─────────────────────────────────────────────────────────────

    #[test]
    fn hide_keeps_an_owning_host() {
        let rig = Rig::started(HandoffConfig::default());
        rig.coordinator.hide();
        assert!(rig.host.borrow().active);
    }

    #[test]
    fn hide_and_show_after_handoff() {
        let mut rig = Rig::started(HandoffConfig::default());
        rig.coordinator.request_transfer(Owner::Receiver, TransferConditions::all_met());
        rig.run(16, 2);
        assert_eq!(rig.coordinator.safety_net_state(), SafetyNetState::Armed);

        rig.coordinator.hide();
        assert!(!rig.host.borrow().active);
        assert_eq!(rig.coordinator.safety_net_state(), SafetyNetState::Idle);

        rig.coordinator.show();
        assert!(rig.host.borrow().active);
    }

    #[test]
    fn hooks_are_safe_before_start_and_after_stop() {
        let mut rig = Rig::new(HandoffConfig::default());
        let now = rig.now();
        rig.coordinator.show();
        rig.coordinator.hide();
        rig.coordinator.report_frame(now);

        rig.coordinator.stop(&mut rig.schedule, now);
        rig.coordinator.show();
        rig.coordinator.hide();
        rig.coordinator.report_frame(now);
        rig.coordinator.poll(now);
        assert_eq!(rig.coordinator.phase(), Phase::End);
    }

    #[test]
    fn snapshot_reads_all_components() {
        let mut rig = Rig::started(HandoffConfig::default());
        rig.run(16, 12);
        let snap = rig.coordinator.snapshot();
        assert_eq!(snap.phase, Phase::LoadingActive);
        assert_eq!(snap.owner, Owner::Host);
        assert_eq!(snap.cadence, CadenceStatus::Healthy);
        assert_eq!(snap.consecutive_healthy, 11);
        assert_eq!(snap.last_tick, Some(11));
        assert!(snap.to_string().starts_with("loading-active | owner host"));
    }
}
