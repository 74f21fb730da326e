//! Recording producers and a tick rig shared by the unit tests.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::cadence::CadenceStatus;
use crate::coordinator::{HandoffCoordinator, HandoffEvents};
use crate::gate::OwnershipChange;
use crate::owner::PhaseTransition;
use crate::producer::{HostProducer, ReceiverProducer, TransferConditions};
use crate::safety_net::ReleaseReason;
use crate::schedule::{TickInfo, TickSchedule};
use crate::warmup::WarmupOutcome;
use crate::{DiagnosticsLog, HandoffConfig};

pub(crate) struct FakeHost {
    id: String,
    pub active: bool,
    pub provide: bool,
    pub rendered: Vec<u64>,
    pub activations: u32,
    pub deactivations: u32,
    pub disposed: bool,
}

impl FakeHost {
    pub fn shared(id: &str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            id: id.to_string(),
            active: false,
            provide: true,
            rendered: Vec::new(),
            activations: 0,
            deactivations: 0,
            disposed: false,
        }))
    }
}

impl HostProducer for FakeHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn activate(&mut self) -> bool {
        self.activations += 1;
        self.active = self.provide;
        self.active
    }

    fn deactivate(&mut self) {
        self.deactivations += 1;
        self.active = false;
    }

    fn render_tick(&mut self, tick: &TickInfo) {
        self.rendered.push(tick.index);
    }

    fn can_provide(&self) -> bool {
        self.provide
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.active = false;
    }
}

pub(crate) struct FakeReceiver {
    id: String,
    pub conditions: TransferConditions,
    /// When false the receiver owns ticks but produces nothing (a stall).
    pub producing: bool,
    /// Ticks on which the receiver slot ran.
    pub invoked: Vec<u64>,
    /// Ticks on which a frame was produced.
    pub rendered: Vec<u64>,
    pub accepted: u32,
    pub revoked: u32,
}

impl FakeReceiver {
    pub fn shared(id: &str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            id: id.to_string(),
            conditions: TransferConditions::all_met(),
            producing: true,
            invoked: Vec::new(),
            rendered: Vec::new(),
            accepted: 0,
            revoked: 0,
        }))
    }
}

impl ReceiverProducer for FakeReceiver {
    fn id(&self) -> &str {
        &self.id
    }

    fn can_accept_transfer(&self) -> TransferConditions {
        self.conditions
    }

    fn on_transfer_accepted(&mut self) {
        self.accepted += 1;
    }

    fn on_transfer_revoked(&mut self) {
        self.revoked += 1;
    }

    fn report_tick_rendered(&mut self, tick: &TickInfo) -> bool {
        self.invoked.push(tick.index);
        if self.producing {
            self.rendered.push(tick.index);
        }
        self.producing
    }
}

/// Observer recording every hook as a short `kind:detail` string.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn names(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Hooks whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.0.borrow().iter().filter(|n| n.starts_with(prefix)).count()
    }

    fn push(&self, name: String) {
        self.0.borrow_mut().push(name);
    }
}

impl HandoffEvents for EventLog {
    fn on_phase_changed(&mut self, t: &PhaseTransition) {
        self.push(format!("phase:{}", t.to));
    }

    fn on_transfer_completed(&mut self, c: &OwnershipChange) {
        self.push(format!("transfer:{}->{}", c.from, c.to));
    }

    fn on_recovery_start(&mut self, attempt: u32) {
        self.push(format!("recovery-start:{attempt}"));
    }

    fn on_recovered(&mut self, attempt: u32) {
        self.push(format!("recovered:{attempt}"));
    }

    fn on_degraded(&mut self, attempts: u32) {
        self.push(format!("degraded:{attempts}"));
    }

    fn on_throttle_detected(&mut self, status: CadenceStatus) {
        self.push(format!("throttle:{status}"));
    }

    fn on_stabilized(&mut self) {
        self.push("stabilized".to_string());
    }

    fn on_warmup_complete(&mut self, outcome: WarmupOutcome) {
        self.push(format!("warmup:{outcome:?}"));
    }

    fn on_safety_net_released(&mut self, reason: ReleaseReason) {
        self.push(format!("safety-net:{reason:?}"));
    }
}

/// A coordinator wired to fakes and a schedule, driven by a virtual clock.
pub(crate) struct Rig {
    pub schedule: TickSchedule,
    pub coordinator: HandoffCoordinator,
    pub host: Rc<RefCell<FakeHost>>,
    pub receiver: Rc<RefCell<FakeReceiver>>,
    pub diagnostics: DiagnosticsLog,
    pub t0: Instant,
    pub clock: Duration,
}

impl Rig {
    pub fn new(config: HandoffConfig) -> Self {
        let diagnostics = DiagnosticsLog::new(config.diagnostics_capacity);
        let coordinator = match HandoffCoordinator::new(config, diagnostics.clone()) {
            Ok(c) => c,
            Err(e) => panic!("test config invalid: {e}"),
        };
        let host = FakeHost::shared("loading-pulse");
        let receiver = FakeReceiver::shared("scene");
        coordinator.register_host(host.clone());
        coordinator.register_receiver(receiver.clone());

        let mut schedule = TickSchedule::new();
        coordinator.install(&mut schedule);

        Self {
            schedule,
            coordinator,
            host,
            receiver,
            diagnostics,
            t0: Instant::now(),
            clock: Duration::ZERO,
        }
    }

    /// Installed and started, warmup skipped.
    pub fn started(config: HandoffConfig) -> Self {
        let rig = Self::new(config);
        if let Err(e) = rig.coordinator.start(rig.now()) {
            panic!("start failed: {e}");
        }
        rig
    }

    pub fn now(&self) -> Instant {
        self.t0 + self.clock
    }

    /// Advances the clock by `step_ms` and runs one tick.
    pub fn tick(&mut self, step_ms: u64) -> TickInfo {
        self.clock += Duration::from_millis(step_ms);
        self.schedule.tick(self.now())
    }

    /// Runs `n` ticks, polling the coordinator after each one.
    pub fn run(&mut self, step_ms: u64, n: usize) -> Vec<TickInfo> {
        (0..n)
            .map(|_| {
                let t = self.tick(step_ms);
                self.coordinator.poll(self.now());
                t
            })
            .collect()
    }

    /// Ticks and polls until `done` holds. `false` if it never did within `max` ticks.
    pub fn run_until(&mut self, step_ms: u64, max: usize, done: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..max {
            self.tick(step_ms);
            self.coordinator.poll(self.now());
            if done(self) {
                return true;
            }
        }
        false
    }

    /// Producers that rendered on tick `index` (0, 1 or 2).
    pub fn renderers_at(&self, index: u64) -> usize {
        usize::from(self.host.borrow().rendered.contains(&index))
            + usize::from(self.receiver.borrow().invoked.contains(&index))
    }
}
