//! One-shot startup barrier.
//!
//! Loading work is held back until the scheduler has delivered a run of
//! fast ticks, so that heavy startup work does not land while the host is
//! still deciding whether the surface deserves full-rate ticks. A hard timeout
//! guarantees the gate opens anyway.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::schedule::TickInfo;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum WarmupState {
    #[default]
    Idle,
    WarmingUp,
    /// Timed out. Passes like `Open`, with degraded confidence.
    Failed,
    Open,
}

impl WarmupState {
    /// `Failed` lets work through as well.
    pub fn is_open(self) -> bool {
        matches!(self, WarmupState::Open | WarmupState::Failed)
    }
}

/// How the gate opened.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WarmupOutcome {
    /// Required run of healthy ticks observed.
    Stable,
    /// Hard timeout elapsed first. Degraded confidence.
    TimedOut,
    /// Opened by `force_open`.
    Forced,
}

impl WarmupOutcome {
    pub fn is_degraded(self) -> bool {
        self == WarmupOutcome::TimedOut
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WarmupSettings {
    pub stable_frames: u32,
    /// Ticks at or below this interval count as healthy.
    pub healthy_threshold: Duration,
    pub timeout: Duration,
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            stable_frames: 15,
            healthy_threshold: Duration::from_millis(25),
            timeout: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Default)]
struct Waiters {
    outcome: Option<WarmupOutcome>,
    wakers: Vec<Waker>,
}

#[derive(Debug)]
pub struct WarmupGate {
    settings: WarmupSettings,
    state: WarmupState,
    started_at: Option<Instant>,
    consecutive: u32,
    waiters: Rc<RefCell<Waiters>>,
}

impl WarmupGate {
    pub fn new(settings: WarmupSettings) -> Self {
        Self {
            settings,
            state: WarmupState::Idle,
            started_at: None,
            consecutive: 0,
            waiters: Rc::new(RefCell::new(Waiters::default())),
        }
    }

    #[inline]
    pub fn state(&self) -> WarmupState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn outcome(&self) -> Option<WarmupOutcome> {
        self.waiters.borrow().outcome
    }

    pub fn consecutive_healthy(&self) -> u32 {
        self.consecutive
    }

    /// Starts counting. Returns `false` if warmup already began or finished.
    pub fn begin(&mut self, now: Instant) -> bool {
        if self.state != WarmupState::Idle {
            return false;
        }
        self.state = WarmupState::WarmingUp;
        self.started_at = Some(now);
        self.consecutive = 0;
        true
    }

    /// Feeds one tick. Returns the outcome on the tick that opens the gate.
    pub fn on_tick(&mut self, tick: &TickInfo) -> Option<WarmupOutcome> {
        if self.state != WarmupState::WarmingUp {
            return None;
        }
        if let Some(outcome) = self.check_timeout(tick.now) {
            return Some(outcome);
        }

        let interval = tick.interval?;
        if interval <= self.settings.healthy_threshold {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }

        if self.consecutive >= self.settings.stable_frames {
            return Some(self.open(WarmupOutcome::Stable));
        }
        None
    }

    /// Opens the gate as a degraded pass once the hard timeout has elapsed.
    ///
    /// Also driven from the wall-clock poll so a stalled scheduler cannot
    /// hold the gate shut.
    pub fn check_timeout(&mut self, now: Instant) -> Option<WarmupOutcome> {
        if self.state != WarmupState::WarmingUp {
            return None;
        }
        let started = self.started_at?;
        if now.saturating_duration_since(started) < self.settings.timeout {
            return None;
        }

        log::warn!(
            "warmup timed out after {:?} with {}/{} healthy ticks",
            self.settings.timeout,
            self.consecutive,
            self.settings.stable_frames
        );
        Some(self.open(WarmupOutcome::TimedOut))
    }

    /// Opens immediately. `None` if the gate was already open.
    pub fn force_open(&mut self) -> Option<WarmupOutcome> {
        if self.state.is_open() {
            return None;
        }
        Some(self.open(WarmupOutcome::Forced))
    }

    /// Future resolving with the outcome once the gate opens.
    pub fn wait(&self) -> WarmupWait {
        WarmupWait {
            waiters: Rc::clone(&self.waiters),
        }
    }

    fn open(&mut self, outcome: WarmupOutcome) -> WarmupOutcome {
        self.state = match outcome {
            WarmupOutcome::TimedOut => WarmupState::Failed,
            WarmupOutcome::Stable | WarmupOutcome::Forced => WarmupState::Open,
        };
        let wakers = {
            let mut w = self.waiters.borrow_mut();
            w.outcome = Some(outcome);
            std::mem::take(&mut w.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        outcome
    }
}

impl Default for WarmupGate {
    fn default() -> Self {
        Self::new(WarmupSettings::default())
    }
}

/// Resolves when the owning [`WarmupGate`] opens. Single-threaded.
#[derive(Debug)]
pub struct WarmupWait {
    waiters: Rc<RefCell<Waiters>>,
}

impl Future for WarmupWait {
    type Output = WarmupOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WarmupOutcome> {
        let mut w = self.waiters.borrow_mut();
        match w.outcome {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !w.wakers.iter().any(|k| k.will_wake(cx.waker())) {
                    w.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
