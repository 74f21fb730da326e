use std::time::{Duration, Instant};

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameTime {
    /// Clamped seconds since the previous tick, for animation.
    pub dt: f32,

    /// Raw time since the previous tick. `None` on the first tick.
    ///
    /// Unclamped so cadence measurements see real scheduler gaps.
    pub interval: Option<Duration>,

    pub now: Instant,

    pub frame_index: u64,
}

/// Produces `FrameTime` snapshots.
///
/// `dt` is clamped so a long stall does not make animations jump; `interval`
/// is left untouched.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Option<Instant>,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: None,
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Forgets the previous tick; the next one reports no interval.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> FrameTime {
        let interval = self.last.map(|last| now.saturating_duration_since(last));
        let dt = interval
            .unwrap_or(self.dt_min)
            .clamp(self.dt_min, self.dt_max);

        self.last = Some(now);

        let ft = FrameTime {
            dt: dt.as_secs_f32(),
            interval,
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_no_interval() {
        let mut clock = FrameClock::new();
        let ft = clock.tick_at(Instant::now());
        assert_eq!(ft.interval, None);
        assert_eq!(ft.frame_index, 0);
    }

    #[test]
    fn interval_is_raw_but_dt_is_clamped() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new();
        clock.tick_at(t0);
        let ft = clock.tick_at(t0 + Duration::from_millis(900));
        assert_eq!(ft.interval, Some(Duration::from_millis(900)));
        assert!((ft.dt - 0.25).abs() < 1e-6);
        assert_eq!(ft.frame_index, 1);
    }

    #[test]
    fn reset_drops_the_baseline() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new();
        clock.tick_at(t0);
        clock.reset();
        let ft = clock.tick_at(t0 + Duration::from_millis(16));
        assert_eq!(ft.interval, None);
        assert_eq!(ft.frame_index, 1);
    }
}
