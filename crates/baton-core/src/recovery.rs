//! Stall detection and recovery.
//!
//! Driven by a wall-clock poll, not by ticks: the failure being guarded
//! against is the receiver (or the whole scheduler) no longer producing
//! frames, in which case tick callbacks may never run.
//!
//! ```text
//! Monitoring ──stall──▶ StallDetected ──▶ Recovering ──frame──▶ Recovered ──grace──▶ Monitoring
//!                             │
//!                             └── attempts exhausted ──▶ Degraded (terminal until reset)
//!
//! A reclaim the host cannot honour also ends in `Degraded`.
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::owner::Owner;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum RecoveryState {
    #[default]
    Monitoring,
    StallDetected,
    Recovering,
    Recovered,
    /// Retries exhausted. Needs [`RecoveryController::reset`].
    Degraded,
}

impl RecoveryState {
    pub fn label(self) -> &'static str {
        match self {
            RecoveryState::Monitoring => "monitoring",
            RecoveryState::StallDetected => "stall-detected",
            RecoveryState::Recovering => "recovering",
            RecoveryState::Recovered => "recovered",
            RecoveryState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RecoveryTransition {
    pub from: RecoveryState,
    pub to: RecoveryState,
    pub at: Instant,
    /// Attempt counter after the change.
    pub attempt: u32,
}

/// What the caller must do after a poll.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecoveryAction {
    None,
    /// Force ownership back to the host now.
    Reclaim { attempt: u32, stalled_for: Duration },
    /// Retries exhausted; surface to the application.
    Degraded { attempts: u32 },
    /// Grace period after a recovery elapsed; back to monitoring.
    Relaxed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecoverySettings {
    pub stall_timeout: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub grace: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_millis(500),
            max_retries: 3,
            poll_interval: Duration::from_millis(100),
            grace: Duration::from_millis(250),
        }
    }
}

const HISTORY_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct RecoveryController {
    settings: RecoverySettings,
    state: RecoveryState,
    attempts: u32,
    last_frame_at: Option<Instant>,
    receiver_since: Option<Instant>,
    recovered_at: Option<Instant>,
    last_poll: Option<Instant>,
    history: VecDeque<RecoveryTransition>,
}

impl RecoveryController {
    pub fn new(settings: RecoverySettings) -> Self {
        Self {
            settings,
            state: RecoveryState::Monitoring,
            attempts: 0,
            last_frame_at: None,
            receiver_since: None,
            recovered_at: None,
            last_poll: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    #[inline]
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    /// Recorded state changes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RecoveryTransition> {
        self.history.iter()
    }

    /// Records a produced frame from any owner.
    ///
    /// Returns `true` when this frame completed a recovery.
    pub fn note_frame(&mut self, now: Instant) -> bool {
        self.last_frame_at = Some(now);
        if self.state != RecoveryState::Recovering {
            return false;
        }
        self.recovered_at = Some(now);
        self.set_state(RecoveryState::Recovered, now);
        true
    }

    /// Tracks when the receiver took the tick; it gets a full timeout from then.
    pub fn note_ownership(&mut self, owner: Owner, now: Instant) {
        self.receiver_since = (owner == Owner::Receiver).then_some(now);
    }

    pub fn is_poll_due(&self, now: Instant) -> bool {
        self.last_poll
            .is_none_or(|last| now.saturating_duration_since(last) >= self.settings.poll_interval)
    }

    pub fn next_poll_at(&self) -> Option<Instant> {
        self.last_poll.map(|last| last + self.settings.poll_interval)
    }

    /// Rate-limited [`evaluate`](Self::evaluate).
    pub fn poll(&mut self, now: Instant, owner: Owner) -> RecoveryAction {
        if !self.is_poll_due(now) {
            return RecoveryAction::None;
        }
        self.last_poll = Some(now);
        self.evaluate(now, owner)
    }

    /// Advances the state machine.
    pub fn evaluate(&mut self, now: Instant, owner: Owner) -> RecoveryAction {
        match self.state {
            RecoveryState::Recovered => {
                let since = self.recovered_at.unwrap_or(now);
                if now.saturating_duration_since(since) < self.settings.grace {
                    return RecoveryAction::None;
                }
                self.recovered_at = None;
                self.set_state(RecoveryState::Monitoring, now);
                RecoveryAction::Relaxed
            }
            RecoveryState::Monitoring => self.check_stall(now, owner),
            RecoveryState::StallDetected | RecoveryState::Recovering | RecoveryState::Degraded => {
                RecoveryAction::None
            }
        }
    }

    fn check_stall(&mut self, now: Instant, owner: Owner) -> RecoveryAction {
        // The host is never judged.
        if owner != Owner::Receiver {
            return RecoveryAction::None;
        }
        let Some(baseline) = self.last_frame_at.max(self.receiver_since) else {
            return RecoveryAction::None;
        };

        let stalled_for = now.saturating_duration_since(baseline);
        if stalled_for < self.settings.stall_timeout {
            return RecoveryAction::None;
        }

        self.attempts += 1;
        self.set_state(RecoveryState::StallDetected, now);

        if self.attempts >= self.settings.max_retries {
            self.set_state(RecoveryState::Degraded, now);
            return RecoveryAction::Degraded { attempts: self.attempts };
        }

        self.receiver_since = None;
        self.set_state(RecoveryState::Recovering, now);
        RecoveryAction::Reclaim {
            attempt: self.attempts,
            stalled_for,
        }
    }

    /// The reclaim ordered by the last poll could not happen (no host able to
    /// take the tick). Nothing can recover the surface automatically, so this
    /// ends in `Degraded`. Returns the attempt count.
    pub fn reclaim_failed(&mut self, now: Instant) -> u32 {
        if self.state == RecoveryState::Recovering {
            self.set_state(RecoveryState::Degraded, now);
        }
        self.attempts
    }

    /// Clears the attempt counter once the receiver has proven stable.
    pub fn reset_attempts(&mut self) {
        if self.state != RecoveryState::Degraded {
            self.attempts = 0;
        }
    }

    /// External reset, including out of `Degraded`.
    pub fn reset(&mut self, now: Instant) {
        self.attempts = 0;
        self.recovered_at = None;
        self.last_frame_at = Some(now);
        self.set_state(RecoveryState::Monitoring, now);
    }

    fn set_state(&mut self, to: RecoveryState, at: Instant) {
        if self.state == to {
            return;
        }
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(RecoveryTransition {
            from: self.state,
            to,
            at,
            attempt: self.attempts,
        });
        self.state = to;
    }
}

impl Default for RecoveryController {
    fn default() -> Self {
        Self::new(RecoverySettings::default())
    }
}
