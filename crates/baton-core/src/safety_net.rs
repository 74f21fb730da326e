//! Keeps the host warm after a handoff.
//!
//! Immediately after the receiver takes the tick the host stays active (not
//! rendering, but ready) so a stall can be answered without a cold start.
//! The net releases the host once the receiver has produced a run of fast
//! frames or once a hard timeout elapses.

use std::time::{Duration, Instant};

use crate::owner::Owner;
use crate::schedule::TickInfo;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ReleaseReason {
    /// The receiver produced the required run of stable frames.
    Stable,
    Timeout,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum SafetyNetState {
    #[default]
    Idle,
    Armed,
    Released(ReleaseReason),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SafetyNetSettings {
    pub stable_frames: u32,
    /// A receiver frame counts as stable below this interval.
    pub stable_interval: Duration,
    pub timeout: Duration,
}

impl Default for SafetyNetSettings {
    fn default() -> Self {
        Self {
            stable_frames: 30,
            stable_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyNet {
    settings: SafetyNetSettings,
    state: SafetyNetState,
    armed_at: Option<Instant>,
    stable_ticks: u32,
    arms: u32,
}

impl SafetyNet {
    pub fn new(settings: SafetyNetSettings) -> Self {
        Self {
            settings,
            state: SafetyNetState::Idle,
            armed_at: None,
            stable_ticks: 0,
            arms: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> SafetyNetState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == SafetyNetState::Armed
    }

    pub fn stable_ticks(&self) -> u32 {
        self.stable_ticks
    }

    /// Times the net was armed, re-arms included.
    pub fn arms(&self) -> u32 {
        self.arms
    }

    /// (Re)starts tracking from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.state = SafetyNetState::Armed;
        self.armed_at = Some(now);
        self.stable_ticks = 0;
        self.arms += 1;
    }

    pub fn disarm(&mut self) {
        self.state = SafetyNetState::Idle;
        self.armed_at = None;
        self.stable_ticks = 0;
    }

    /// Feeds one tick. `produced` is whether the receiver produced a frame.
    ///
    /// Returns the reason on the tick the host should be released.
    pub fn on_tick(&mut self, tick: &TickInfo, owner: Owner, produced: bool) -> Option<ReleaseReason> {
        if self.state != SafetyNetState::Armed || owner != Owner::Receiver {
            return None;
        }

        let stable = produced && tick.interval.is_some_and(|i| i < self.settings.stable_interval);
        if stable {
            self.stable_ticks += 1;
        } else {
            self.stable_ticks = 0;
        }

        let elapsed = self
            .armed_at
            .map_or(Duration::ZERO, |at| tick.now.saturating_duration_since(at));

        let reason = if self.stable_ticks >= self.settings.stable_frames {
            ReleaseReason::Stable
        } else if elapsed >= self.settings.timeout {
            ReleaseReason::Timeout
        } else {
            return None;
        };

        self.state = SafetyNetState::Released(reason);
        self.armed_at = None;
        Some(reason)
    }
}

impl Default for SafetyNet {
    fn default() -> Self {
        Self::new(SafetyNetSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(index: u64, now: Instant, interval_ms: u64) -> TickInfo {
        TickInfo {
            index,
            now,
            interval: Some(Duration::from_millis(interval_ms)),
        }
    }

    fn drive(net: &mut SafetyNet, t0: Instant, interval_ms: u64, n: u64, produced: bool) -> Option<ReleaseReason> {
        for i in 1..=n {
            let t = tick(i, t0 + Duration::from_millis(i * interval_ms), interval_ms);
            if let Some(r) = net.on_tick(&t, Owner::Receiver, produced) {
                return Some(r);
            }
        }
        None
    }

    #[test]
    fn releases_after_stable_run() {
        let t0 = Instant::now();
        let mut net = SafetyNet::default();
        net.arm(t0);
        assert_eq!(drive(&mut net, t0, 16, 29, true), None);
        let t = tick(30, t0 + Duration::from_millis(480), 16);
        assert_eq!(net.on_tick(&t, Owner::Receiver, true), Some(ReleaseReason::Stable));
        assert_eq!(net.state(), SafetyNetState::Released(ReleaseReason::Stable));
    }

    #[test]
    fn slow_frames_fall_back_to_timeout() {
        let t0 = Instant::now();
        let mut net = SafetyNet::default();
        net.arm(t0);
        assert_eq!(drive(&mut net, t0, 60, 200, true), Some(ReleaseReason::Timeout));
    }

    #[test]
    fn ticks_without_frames_are_not_stable() {
        let t0 = Instant::now();
        let mut net = SafetyNet::default();
        net.arm(t0);
        drive(&mut net, t0, 16, 40, false);
        assert!(net.is_armed());
        assert_eq!(net.stable_ticks(), 0);
    }

    #[test]
    fn ignores_ticks_while_host_owns_or_idle() {
        let t0 = Instant::now();
        let mut net = SafetyNet::default();
        assert_eq!(net.on_tick(&tick(1, t0, 16), Owner::Receiver, true), None);
        net.arm(t0);
        assert_eq!(net.on_tick(&tick(2, t0, 16), Owner::Host, true), None);
        assert_eq!(net.stable_ticks(), 0);
    }

    #[test]
    fn rearm_restarts_the_count() {
        let t0 = Instant::now();
        let mut net = SafetyNet::default();
        net.arm(t0);
        drive(&mut net, t0, 16, 20, true);
        net.arm(t0 + Duration::from_millis(320));
        assert_eq!(net.stable_ticks(), 0);
        assert_eq!(net.arms(), 2);
    }
}
