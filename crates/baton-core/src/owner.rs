use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// Who produces the frame for the current tick.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Owner {
    /// Transient. Only observed before start or after stop.
    #[default]
    None,
    /// Loading-phase producer.
    Host,
    /// Fully-loaded application producer.
    Receiver,
}

impl Owner {
    #[inline]
    pub fn is_none(self) -> bool {
        self == Owner::None
    }

    pub fn label(self) -> &'static str {
        match self {
            Owner::None => "none",
            Owner::Host => "host",
            Owner::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle phase of a handoff.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Phase {
    #[default]
    Dormant,
    Begin,
    LoadingActive,
    Transferring,
    Active,
    EmergencyRecovery,
    End,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Dormant => "dormant",
            Phase::Begin => "begin",
            Phase::LoadingActive => "loading-active",
            Phase::Transferring => "transferring",
            Phase::Active => "active",
            Phase::EmergencyRecovery => "emergency-recovery",
            Phase::End => "end",
        }
    }

    /// `true` between start and stop.
    pub fn is_running(self) -> bool {
        !matches!(self, Phase::Dormant | Phase::End)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded phase change, kept for forensics.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub at: Instant,
    /// Index of the last tick that had run when the change happened.
    pub tick: Option<u64>,
    pub reason: String,
}

/// Current phase plus a bounded history of how it got there.
///
/// Oldest entries are evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct PhaseLog {
    current: Phase,
    entries: VecDeque<PhaseTransition>,
    capacity: usize,
}

impl PhaseLog {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        Self {
            current: Phase::Dormant,
            entries: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Moves to `to`, recording the change.
    ///
    /// Returns `None` (and records nothing) when already in `to`.
    pub fn transition(
        &mut self,
        to: Phase,
        at: Instant,
        tick: Option<u64>,
        reason: impl Into<String>,
    ) -> Option<PhaseTransition> {
        if self.current == to {
            return None;
        }

        let entry = PhaseTransition {
            from: self.current,
            to,
            at,
            tick,
            reason: reason.into(),
        };

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        self.current = to;

        Some(entry)
    }

    /// Recorded transitions, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &PhaseTransition> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&PhaseTransition> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Phases visited so far, starting with the first `from`.
    pub fn path(&self) -> Vec<Phase> {
        let mut out: Vec<Phase> = self.entries.front().map(|e| e.from).into_iter().collect();
        out.extend(self.entries.iter().map(|e| e.to));
        out
    }
}

impl Default for PhaseLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_dormant_and_empty() {
        let log = PhaseLog::default();
        assert_eq!(log.current(), Phase::Dormant);
        assert!(log.is_empty());
    }

    #[test]
    fn transition_records_reason_and_tick() {
        let mut log = PhaseLog::default();
        let now = Instant::now();
        let t = log.transition(Phase::Begin, now, Some(4), "start").unwrap();
        assert_eq!(t.from, Phase::Dormant);
        assert_eq!(t.to, Phase::Begin);
        assert_eq!(t.tick, Some(4));
        assert_eq!(t.reason, "start");
        assert_eq!(log.current(), Phase::Begin);
    }

    #[test]
    fn same_phase_is_not_recorded() {
        let mut log = PhaseLog::default();
        let now = Instant::now();
        log.transition(Phase::Begin, now, None, "a");
        assert!(log.transition(Phase::Begin, now, None, "b").is_none());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut log = PhaseLog::new(2);
        let now = Instant::now();
        log.transition(Phase::Begin, now, None, "1");
        log.transition(Phase::LoadingActive, now, None, "2");
        log.transition(Phase::Transferring, now, None, "3");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries().next().unwrap().reason, "2");
        assert_eq!(
            log.path(),
            vec![Phase::Begin, Phase::LoadingActive, Phase::Transferring]
        );
    }

    #[test]
    fn running_excludes_dormant_and_end() {
        assert!(!Phase::Dormant.is_running());
        assert!(!Phase::End.is_running());
        assert!(Phase::Active.is_running());
        assert!(Phase::EmergencyRecovery.is_running());
    }
}
