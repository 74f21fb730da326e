use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use log::Level;

/// One human-readable diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEntry {
    pub at: Instant,
    /// Last tick that had run, if any.
    pub tick: Option<u64>,
    pub level: Level,
    pub message: String,
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<DiagnosticEntry>,
    capacity: usize,
    dropped: u64,
    debug: bool,
}

/// Bounded diagnostics sink, shared by handle.
///
/// Every recorded line is also emitted through the `log` facade under the
/// `baton` target. `Debug` lines are discarded unless debug logging is on.
#[derive(Debug, Clone)]
pub struct DiagnosticsLog(Rc<RefCell<Ring>>);

impl DiagnosticsLog {
    pub fn new(capacity: usize) -> Self {
        Self(Rc::new(RefCell::new(Ring {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            dropped: 0,
            debug: false,
        })))
    }

    pub fn set_debug(&self, enabled: bool) {
        self.0.borrow_mut().debug = enabled;
    }

    pub fn debug_enabled(&self) -> bool {
        self.0.borrow().debug
    }

    pub fn record(&self, level: Level, at: Instant, tick: Option<u64>, message: impl Into<String>) {
        let mut ring = self.0.borrow_mut();
        if level == Level::Trace || (level == Level::Debug && !ring.debug) {
            return;
        }

        let message = message.into();
        match tick {
            Some(t) => log::log!(target: "baton", level, "[tick {t}] {message}"),
            None => log::log!(target: "baton", level, "{message}"),
        }

        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
            ring.dropped += 1;
        }
        ring.entries.push_back(DiagnosticEntry { at, tick, level, message });
    }

    /// Copy of the retained lines, oldest first.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.0.borrow().entries.iter().cloned().collect()
    }

    /// `true` if any retained line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.0.borrow().entries.iter().any(|e| e.message.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.0.borrow().capacity
    }

    /// Lines evicted to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.0.borrow().dropped
    }

    pub fn clear(&self) {
        let mut ring = self.0.borrow_mut();
        ring.entries.clear();
        ring.dropped = 0;
    }
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_counts_drops() {
        let log = DiagnosticsLog::new(2);
        let now = Instant::now();
        for i in 0..5 {
            log.record(Level::Info, now, Some(i), format!("line {i}"));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 3);
        assert_eq!(log.entries()[0].message, "line 3");
    }

    #[test]
    fn debug_lines_need_debug_enabled() {
        let log = DiagnosticsLog::default();
        let now = Instant::now();
        log.record(Level::Debug, now, None, "hidden");
        assert!(log.is_empty());

        log.set_debug(true);
        log.record(Level::Debug, now, None, "shown");
        assert!(log.contains("shown"));
    }

    #[test]
    fn clones_share_the_buffer() {
        let a = DiagnosticsLog::default();
        let b = a.clone();
        a.record(Level::Warn, Instant::now(), None, "stall");
        assert!(b.contains("stall"));
        b.clear();
        assert!(a.is_empty());
    }
}
