//! Priority-ordered per-tick callbacks.
//!
//! The embedding frame driver owns a [`TickSchedule`] and calls
//! [`TickSchedule::tick`] once per frame. Every registered closure sees the
//! same [`TickInfo`], in ascending priority order. Ordering between
//! components is expressed only through these priorities.

use std::fmt;
use std::time::{Duration, Instant};

/// Priorities used by [`crate::HandoffCoordinator`]. Lower runs first.
pub mod priority {
    pub const WARMUP_PROBE: i32 = -20;
    /// Dequeues pending transfers before anyone renders.
    pub const ARBITER: i32 = 0;
    pub const HOST_SLOT: i32 = 10;
    pub const RECEIVER_SLOT: i32 = 20;
    pub const CADENCE_PROBE: i32 = 30;
    pub const MONITOR: i32 = 40;
}

/// Snapshot handed to every callback of one tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Monotonic tick counter.
    pub index: u64,

    /// Timestamp supplied by the driver.
    pub now: Instant,

    /// Time since the previous tick. `None` on the first tick after a clock reset.
    pub interval: Option<Duration>,
}

/// Handle returned by [`TickSchedule::register`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CallbackId(u64);

pub type TickCallback = Box<dyn FnMut(&TickInfo)>;

struct Entry {
    id: CallbackId,
    priority: i32,
    label: &'static str,
    callback: TickCallback,
}

/// Ordered list of per-tick closures.
///
/// Closures cannot register or unregister entries while a tick is running;
/// all wiring happens between ticks.
#[derive(Default)]
pub struct TickSchedule {
    entries: Vec<Entry>,
    next_id: u64,
    next_index: u64,
    last: Option<Instant>,
}

impl TickSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `callback` at `priority`. Equal priorities keep registration order.
    pub fn register<F>(&mut self, priority: i32, label: &'static str, callback: F) -> CallbackId
    where
        F: FnMut(&TickInfo) + 'static,
    {
        let id = CallbackId(self.next_id);
        self.next_id += 1;

        let at = self.entries.partition_point(|e| e.priority <= priority);
        self.entries.insert(
            at,
            Entry {
                id,
                priority,
                label,
                callback: Box::new(callback),
            },
        );

        id
    }

    /// Removes a callback. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: CallbackId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in execution order.
    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.label)
    }

    /// Number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.next_index
    }

    /// Forgets the previous timestamp so the next tick reports no interval.
    ///
    /// Useful after the driver was suspended (minimized window, debugger).
    pub fn reset_clock(&mut self) {
        self.last = None;
    }

    /// Runs one tick at `now`.
    pub fn tick(&mut self, now: Instant) -> TickInfo {
        let interval = self.last.map(|last| now.saturating_duration_since(last));
        self.last = Some(now);

        let info = TickInfo {
            index: self.next_index,
            now,
            interval,
        };
        self.next_index = self.next_index.wrapping_add(1);

        for entry in self.entries.iter_mut() {
            (entry.callback)(&info);
        }

        info
    }
}

impl fmt::Debug for TickSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSchedule")
            .field("labels", &self.labels().collect::<Vec<_>>())
            .field("ticks", &self.next_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    // ── ordering ──────────────────────────────────────────────────────────

    #[test]
    fn runs_in_priority_order_regardless_of_registration() {
        let seen = recorder();
        let mut schedule = TickSchedule::new();

        for (prio, label) in [(20, "late"), (0, "first"), (10, "middle")] {
            let seen = Rc::clone(&seen);
            schedule.register(prio, label, move |_| seen.borrow_mut().push(label));
        }

        schedule.tick(Instant::now());
        assert_eq!(*seen.borrow(), vec!["first", "middle", "late"]);
        assert_eq!(schedule.labels().collect::<Vec<_>>(), vec!["first", "middle", "late"]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let seen = recorder();
        let mut schedule = TickSchedule::new();
        for label in ["a", "b", "c"] {
            let seen = Rc::clone(&seen);
            schedule.register(5, label, move |_| seen.borrow_mut().push(label));
        }
        schedule.tick(Instant::now());
        assert_eq!(*seen.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unregister_removes_only_that_callback() {
        let seen = recorder();
        let mut schedule = TickSchedule::new();
        let s1 = Rc::clone(&seen);
        let a = schedule.register(0, "a", move |_| s1.borrow_mut().push("a"));
        let s2 = Rc::clone(&seen);
        schedule.register(1, "b", move |_| s2.borrow_mut().push("b"));

        assert!(schedule.unregister(a));
        assert!(!schedule.unregister(a));
        schedule.tick(Instant::now());
        assert_eq!(*seen.borrow(), vec!["b"]);
    }

    // ── tick info ─────────────────────────────────────────────────────────

    #[test]
    fn first_tick_has_no_interval() {
        let mut schedule = TickSchedule::new();
        let t0 = Instant::now();
        let first = schedule.tick(t0);
        assert_eq!(first.index, 0);
        assert!(first.interval.is_none());

        let second = schedule.tick(t0 + Duration::from_millis(16));
        assert_eq!(second.index, 1);
        assert_eq!(second.interval, Some(Duration::from_millis(16)));
    }

    #[test]
    fn every_callback_sees_the_same_tick() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut schedule = TickSchedule::new();
        for prio in [0, 1, 2] {
            let seen = Rc::clone(&seen);
            schedule.register(prio, "recorder", move |t| seen.borrow_mut().push(t.index));
        }
        schedule.tick(Instant::now());
        schedule.tick(Instant::now());
        assert_eq!(*seen.borrow(), vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn reset_clock_drops_interval() {
        let mut schedule = TickSchedule::new();
        let t0 = Instant::now();
        schedule.tick(t0);
        schedule.reset_clock();
        let t = schedule.tick(t0 + Duration::from_secs(5));
        assert!(t.interval.is_none());
        assert_eq!(t.index, 1);
    }
}
