//! Frame cadence classification.
//!
//! Host schedulers deprioritize surfaces they consider idle, which shows up
//! as tick intervals locking near a fixed slow value. [`CadenceClassifier`]
//! keeps a rolling window of intervals and reports when that happens, and when
//! cadence has been healthy long enough to trust a handoff.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum CadenceStatus {
    #[default]
    Healthy,
    /// Rolling average is slow but recent ticks are not throttled.
    Warning,
    Throttled,
    SeverelyThrottled,
}

impl CadenceStatus {
    #[inline]
    pub fn is_throttled(self) -> bool {
        matches!(self, CadenceStatus::Throttled | CadenceStatus::SeverelyThrottled)
    }

    pub fn label(self) -> &'static str {
        match self {
            CadenceStatus::Healthy => "healthy",
            CadenceStatus::Warning => "warning",
            CadenceStatus::Throttled => "throttled",
            CadenceStatus::SeverelyThrottled => "severely-throttled",
        }
    }
}

impl fmt::Display for CadenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classification thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CadenceThresholds {
    /// Rolling window length (samples).
    pub window: usize,
    /// Samples used for the throttle check.
    pub recent: usize,
    /// Rolling average below this is healthy.
    pub healthy: Duration,
    pub throttle: Duration,
    pub severe: Duration,
    /// Consecutive healthy samples needed before cadence counts as stable.
    pub stable_frames: u32,
}

impl Default for CadenceThresholds {
    fn default() -> Self {
        Self {
            window: 20,
            recent: 5,
            healthy: Duration::from_millis(50),
            throttle: Duration::from_millis(75),
            severe: Duration::from_millis(100),
            stable_frames: 10,
        }
    }
}

impl CadenceThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::new("cadence.window", "must be at least 1"));
        }
        if self.recent == 0 || self.recent > self.window {
            return Err(ConfigError::new("cadence.recent", "must be within 1..=window"));
        }
        if self.stable_frames == 0 {
            return Err(ConfigError::new("cadence.stable_frames", "must be at least 1"));
        }
        if !(self.healthy <= self.throttle && self.throttle <= self.severe) {
            return Err(ConfigError::new(
                "cadence",
                "thresholds must satisfy healthy <= throttle <= severe",
            ));
        }
        Ok(())
    }
}

/// Edge-triggered notifications from [`CadenceClassifier::record`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CadenceEvent {
    /// Status just entered a throttled state.
    ThrottleDetected(CadenceStatus),
    /// Status is healthy and just became stable.
    Stabilized,
}

#[derive(Debug, Clone)]
pub struct CadenceClassifier {
    thresholds: CadenceThresholds,
    samples: VecDeque<f64>,
    status: CadenceStatus,
    consecutive_healthy: u32,
    stable_healthy: bool,
    total: u64,
}

impl CadenceClassifier {
    pub fn new(thresholds: CadenceThresholds) -> Self {
        Self {
            samples: VecDeque::with_capacity(thresholds.window),
            thresholds,
            status: CadenceStatus::Healthy,
            consecutive_healthy: 0,
            stable_healthy: false,
            total: 0,
        }
    }

    pub fn thresholds(&self) -> &CadenceThresholds {
        &self.thresholds
    }

    /// Adds one interval sample and reclassifies.
    pub fn record(&mut self, interval: Duration) -> Option<CadenceEvent> {
        let ms = interval.as_secs_f64() * 1000.0;

        if self.samples.len() >= self.thresholds.window {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
        self.total += 1;

        if ms < ms_of(self.thresholds.healthy) {
            self.consecutive_healthy = self.consecutive_healthy.saturating_add(1);
        } else {
            self.consecutive_healthy = 0;
        }

        let previous = self.status;
        self.status = self.classify();

        let stable_now = self.status == CadenceStatus::Healthy && self.is_stable();
        let event = if self.status.is_throttled() && !previous.is_throttled() {
            Some(CadenceEvent::ThrottleDetected(self.status))
        } else if stable_now && !self.stable_healthy {
            Some(CadenceEvent::Stabilized)
        } else {
            None
        };
        self.stable_healthy = stable_now;

        event
    }

    fn classify(&self) -> CadenceStatus {
        let recent = self.recent_average_ms();
        if recent >= ms_of(self.thresholds.severe) {
            CadenceStatus::SeverelyThrottled
        } else if recent >= ms_of(self.thresholds.throttle) {
            CadenceStatus::Throttled
        } else if self.average_ms() < ms_of(self.thresholds.healthy) {
            CadenceStatus::Healthy
        } else {
            CadenceStatus::Warning
        }
    }

    /// Mean of the whole window; `0.0` when empty.
    pub fn average_ms(&self) -> f64 {
        mean(self.samples.iter().copied(), self.samples.len())
    }

    /// Mean of the last `recent` samples; `0.0` when empty.
    pub fn recent_average_ms(&self) -> f64 {
        let n = self.thresholds.recent.min(self.samples.len());
        let skip = self.samples.len() - n;
        mean(self.samples.iter().skip(skip).copied(), n)
    }

    #[inline]
    pub fn status(&self) -> CadenceStatus {
        self.status
    }

    #[inline]
    pub fn consecutive_healthy_frames(&self) -> u32 {
        self.consecutive_healthy
    }

    pub fn is_stable(&self) -> bool {
        self.consecutive_healthy >= self.thresholds.stable_frames
    }

    /// Healthy and stable: cadence alone would not block a transfer.
    pub fn usable_for_transfer(&self) -> bool {
        self.status == CadenceStatus::Healthy && self.is_stable()
    }

    /// `(cadence_healthy, cadence_stable)` as transfer condition flags.
    pub fn conditions_hint(&self) -> (bool, bool) {
        (self.status == CadenceStatus::Healthy, self.is_stable())
    }

    /// Samples currently in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples recorded since construction, including evicted ones.
    pub fn total_samples(&self) -> u64 {
        self.total
    }

    /// Clean read for a new owner.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.status = CadenceStatus::Healthy;
        self.consecutive_healthy = 0;
        self.stable_healthy = false;
    }
}

impl Default for CadenceClassifier {
    fn default() -> Self {
        Self::new(CadenceThresholds::default())
    }
}

#[inline]
fn ms_of(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        values.sum::<f64>() / n as f64
    }
}
