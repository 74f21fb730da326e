//! Ownership arbitration.
//!
//! [`ArbitrationGate`] is the single source of truth for which producer owns
//! the tick. Transfers are queued and applied by [`ArbitrationGate::arbitrate`]
//! at the start of the *next* tick, before either producer slot runs, so
//! both slots observe the flip within the same tick.
//!
//! Per-tick order (see [`crate::schedule::priority`]):
//! 1. `arbitrate`: dequeue, flip, notify the new owner
//! 2. `host_slot`: host renders if active and owning
//! 3. `receiver_slot`: receiver renders if owning

use std::rc::Rc;

use crate::error::TransferRejection;
use crate::owner::Owner;
use crate::producer::{SharedHost, SharedReceiver, TransferConditions};
use crate::schedule::TickInfo;

/// A queued transfer. At most one is pending at a time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TransferRequest {
    pub target: Owner,
    pub conditions: TransferConditions,
    /// Index of the tick running, or last run, when the request was made.
    pub requested_at_tick: Option<u64>,
}

/// An applied flip.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OwnershipChange {
    pub from: Owner,
    pub to: Owner,
    pub tick: Option<u64>,
    /// Applied by `force_transfer` instead of the queue.
    pub forced: bool,
}

#[derive(Default)]
pub struct ArbitrationGate {
    owner: Owner,
    host: Option<SharedHost>,
    receiver: Option<SharedReceiver>,
    pending: Option<TransferRequest>,
    started: bool,
    last_tick: Option<u64>,
    transfers: u64,
}

impl ArbitrationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the host, returning the one it replaced.
    pub fn register_host(&mut self, host: SharedHost) -> Option<SharedHost> {
        self.host.replace(host)
    }

    pub fn register_receiver(&mut self, receiver: SharedReceiver) -> Option<SharedReceiver> {
        self.receiver.replace(receiver)
    }

    pub fn host(&self) -> Option<&SharedHost> {
        self.host.as_ref()
    }

    pub fn receiver(&self) -> Option<&SharedReceiver> {
        self.receiver.as_ref()
    }

    #[inline]
    pub fn current_owner(&self) -> Owner {
        self.owner
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn pending_request(&self) -> Option<&TransferRequest> {
        self.pending.as_ref()
    }

    /// Flips applied since construction, queued and forced.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Sets who owns the first tick and starts the gate.
    pub fn set_initial_owner(&mut self, owner: Owner) -> Result<(), TransferRejection> {
        match owner {
            Owner::None => return Err(TransferRejection::InvalidTarget),
            Owner::Host => {
                let host = self.host.as_ref().ok_or(TransferRejection::NotRegistered(Owner::Host))?;
                let mut host = host.borrow_mut();
                if !host.is_active() && !host.activate() {
                    return Err(TransferRejection::HostUnavailable);
                }
            }
            Owner::Receiver => {
                let receiver = self
                    .receiver
                    .as_ref()
                    .ok_or(TransferRejection::NotRegistered(Owner::Receiver))?;
                receiver.borrow_mut().on_transfer_accepted();
            }
        }

        self.owner = owner;
        self.pending = None;
        self.started = true;
        Ok(())
    }

    /// Marks tick `index` as running. Requests made from here on, even before
    /// the arbiter step of this tick, apply no earlier than `index + 1`.
    pub fn begin_tick(&mut self, index: u64) {
        self.last_tick = Some(index);
    }

    /// Queues a transfer for the next tick. `false` means nothing changed.
    pub fn request_transfer(&mut self, target: Owner, conditions: TransferConditions) -> bool {
        match self.try_request_transfer(target, conditions) {
            Ok(()) => true,
            Err(reason) => {
                log::debug!("transfer to {target} rejected: {reason}");
                false
            }
        }
    }

    /// Like [`request_transfer`](Self::request_transfer) but says why.
    pub fn try_request_transfer(
        &mut self,
        target: Owner,
        conditions: TransferConditions,
    ) -> Result<(), TransferRejection> {
        if !self.started {
            return Err(TransferRejection::NotStarted);
        }
        if target.is_none() {
            return Err(TransferRejection::InvalidTarget);
        }
        if target == self.owner {
            return Err(TransferRejection::AlreadyOwner(target));
        }
        self.check_registered(target)?;

        let unmet = conditions.unmet();
        if !unmet.is_empty() {
            return Err(TransferRejection::ConditionsUnmet(unmet));
        }

        let request = TransferRequest {
            target,
            conditions,
            requested_at_tick: self.last_tick,
        };
        if let Some(replaced) = self.pending.replace(request) {
            log::debug!("pending transfer to {} replaced", replaced.target);
        }
        Ok(())
    }

    /// Arbiter step. Applies a pending request made before this tick.
    pub fn arbitrate(&mut self, tick: &TickInfo) -> Option<OwnershipChange> {
        self.begin_tick(tick.index);
        if !self.started {
            return None;
        }

        let due = matches!(
            self.pending,
            Some(req) if req.requested_at_tick.is_none_or(|t| tick.index > t)
        );
        if !due {
            return None;
        }

        let request = self.pending.take()?;
        if request.target == self.owner {
            return None;
        }
        Some(self.flip(request.target, false))
    }

    /// Flips ownership now, discarding any pending request.
    ///
    /// Reserved for stall recovery. Returns `None` when nothing changed.
    pub fn force_transfer(&mut self, target: Owner) -> Option<OwnershipChange> {
        if let Some(dropped) = self.pending.take() {
            log::debug!("forced transfer discards pending request to {}", dropped.target);
        }
        if !self.started || target.is_none() || target == self.owner {
            return None;
        }
        if let Err(reason) = self.check_registered(target) {
            log::warn!("forced transfer to {target} impossible: {reason}");
            return None;
        }
        Some(self.flip(target, true))
    }

    /// Host to render this tick, if it is active and owns the tick.
    pub fn host_slot(&self) -> Option<SharedHost> {
        if self.owner != Owner::Host {
            return None;
        }
        let host = self.host.as_ref()?;
        host.borrow().is_active().then(|| Rc::clone(host))
    }

    /// Receiver to render this tick, if it owns the tick.
    pub fn receiver_slot(&self) -> Option<SharedReceiver> {
        if self.owner != Owner::Receiver {
            return None;
        }
        self.receiver.as_ref().map(Rc::clone)
    }

    /// Stops the gate: pending request dropped, owner cleared.
    pub fn clear(&mut self) {
        self.pending = None;
        self.started = false;
        self.owner = Owner::None;
    }

    fn check_registered(&self, target: Owner) -> Result<(), TransferRejection> {
        match target {
            Owner::None => Err(TransferRejection::InvalidTarget),
            Owner::Host => {
                let host = self.host.as_ref().ok_or(TransferRejection::NotRegistered(Owner::Host))?;
                if host.borrow().can_provide() {
                    Ok(())
                } else {
                    Err(TransferRejection::HostUnavailable)
                }
            }
            Owner::Receiver => self
                .receiver
                .as_ref()
                .map(|_| ())
                .ok_or(TransferRejection::NotRegistered(Owner::Receiver)),
        }
    }

    fn flip(&mut self, to: Owner, forced: bool) -> OwnershipChange {
        let from = self.owner;
        self.owner = to;
        self.transfers += 1;

        // The new owner learns first; revocation follows.
        match to {
            Owner::Host => {
                if let Some(host) = &self.host {
                    let mut host = host.borrow_mut();
                    if !host.is_active() && !host.activate() {
                        log::warn!("host `{}` refused activation on takeover", host.id());
                    }
                }
            }
            Owner::Receiver => {
                if let Some(receiver) = &self.receiver {
                    receiver.borrow_mut().on_transfer_accepted();
                }
            }
            Owner::None => {}
        }
        if from == Owner::Receiver {
            if let Some(receiver) = &self.receiver {
                receiver.borrow_mut().on_transfer_revoked();
            }
        }

        OwnershipChange {
            from,
            to,
            tick: self.last_tick,
            forced,
        }
    }
}

impl std::fmt::Debug for ArbitrationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbitrationGate")
            .field("owner", &self.owner)
            .field("host", &self.host.as_ref().map(|h| h.borrow().id().to_string()))
            .field("receiver", &self.receiver.as_ref().map(|r| r.borrow().id().to_string()))
            .field("pending", &self.pending)
            .field("started", &self.started)
            .field("transfers", &self.transfers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, FakeReceiver};
    use std::cell::RefCell;
    use std::time::{Duration, Instant};

    struct Bench {
        gate: ArbitrationGate,
        host: Rc<RefCell<FakeHost>>,
        receiver: Rc<RefCell<FakeReceiver>>,
        t0: Instant,
        next: u64,
    }

    impl Bench {
        fn started() -> Self {
            let host = FakeHost::shared("loading");
            let receiver = FakeReceiver::shared("scene");
            let mut gate = ArbitrationGate::new();
            gate.register_host(host.clone());
            gate.register_receiver(receiver.clone());
            gate.set_initial_owner(Owner::Host).unwrap();
            Self { gate, host, receiver, t0: Instant::now(), next: 0 }
        }

        /// Arbiter, host slot, receiver slot, in priority order.
        fn tick(&mut self) -> (u64, Option<OwnershipChange>) {
            let info = TickInfo {
                index: self.next,
                now: self.t0 + Duration::from_millis(self.next * 16),
                interval: Some(Duration::from_millis(16)),
            };
            self.next += 1;

            let change = self.gate.arbitrate(&info);
            if let Some(host) = self.gate.host_slot() {
                host.borrow_mut().render_tick(&info);
            }
            if let Some(receiver) = self.gate.receiver_slot() {
                receiver.borrow_mut().report_tick_rendered(&info);
            }
            (info.index, change)
        }

        fn renderers_at(&self, index: u64) -> usize {
            usize::from(self.host.borrow().rendered.contains(&index))
                + usize::from(self.receiver.borrow().invoked.contains(&index))
        }
    }

    // ── validation ────────────────────────────────────────────────────────

    #[test]
    fn rejects_before_start() {
        let mut gate = ArbitrationGate::new();
        gate.register_receiver(FakeReceiver::shared("scene"));
        assert_eq!(
            gate.try_request_transfer(Owner::Receiver, TransferConditions::all_met()),
            Err(TransferRejection::NotStarted)
        );
    }

    #[test]
    fn rejects_current_owner_without_side_effects() {
        let mut b = Bench::started();
        assert!(b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met()));
        let pending = b.gate.pending_request().copied();

        assert_eq!(
            b.gate.try_request_transfer(Owner::Host, TransferConditions::all_met()),
            Err(TransferRejection::AlreadyOwner(Owner::Host))
        );
        assert_eq!(b.gate.pending_request().copied(), pending);
        assert_eq!(b.gate.current_owner(), Owner::Host);
    }

    #[test]
    fn rejects_unmet_conditions_and_names_them() {
        let mut b = Bench::started();
        let conditions = TransferConditions {
            can_draw_one_frame: false,
            ..TransferConditions::all_met()
        };
        assert!(!b.gate.request_transfer(Owner::Receiver, conditions));
        assert_eq!(
            b.gate.try_request_transfer(Owner::Receiver, conditions),
            Err(TransferRejection::ConditionsUnmet(vec!["can_draw_one_frame"]))
        );
        assert!(b.gate.pending_request().is_none());
    }

    #[test]
    fn rejects_unregistered_target() {
        let mut gate = ArbitrationGate::new();
        gate.register_host(FakeHost::shared("loading"));
        gate.set_initial_owner(Owner::Host).unwrap();
        assert_eq!(
            gate.try_request_transfer(Owner::Receiver, TransferConditions::all_met()),
            Err(TransferRejection::NotRegistered(Owner::Receiver))
        );
    }

    #[test]
    fn initial_owner_none_is_invalid() {
        let mut gate = ArbitrationGate::new();
        assert_eq!(gate.set_initial_owner(Owner::None), Err(TransferRejection::InvalidTarget));
        assert!(!gate.is_started());
    }

    #[test]
    fn initial_host_is_activated() {
        let b = Bench::started();
        assert!(b.host.borrow().active);
        assert_eq!(b.host.borrow().activations, 1);
    }

    // ── atomic flip ───────────────────────────────────────────────────────

    #[test]
    fn flip_happens_on_next_tick_not_synchronously() {
        let mut b = Bench::started();
        let (t, _) = b.tick();
        assert!(b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met()));
        assert_eq!(b.gate.current_owner(), Owner::Host);
        assert_eq!(b.gate.pending_request().unwrap().requested_at_tick, Some(t));

        let (t1, change) = b.tick();
        let change = change.unwrap();
        assert_eq!((change.from, change.to, change.forced), (Owner::Host, Owner::Receiver, false));
        assert_eq!(change.tick, Some(t1));
        assert_eq!(b.gate.current_owner(), Owner::Receiver);
        // Both slots saw the flip within the same tick.
        assert!(!b.host.borrow().rendered.contains(&t1));
        assert!(b.receiver.borrow().invoked.contains(&t1));
        assert_eq!(b.receiver.borrow().accepted, 1);
    }

    #[test]
    fn request_before_first_tick_applies_on_first_tick() {
        let mut b = Bench::started();
        assert!(b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met()));
        let (_, change) = b.tick();
        assert!(change.is_some());
    }

    #[test]
    fn newer_request_replaces_pending() {
        let mut b = Bench::started();
        b.tick();
        let a = TransferConditions::all_met();
        assert!(b.gate.request_transfer(Owner::Receiver, a));
        assert!(b.gate.request_transfer(Owner::Receiver, a));
        let (_, change) = b.tick();
        assert!(change.is_some());
        let (_, change) = b.tick();
        assert!(change.is_none());
        assert_eq!(b.gate.transfers(), 1);
    }

    #[test]
    fn exactly_one_renderer_every_tick_across_transfers() {
        let mut b = Bench::started();
        let mut ticks = Vec::new();
        for round in 0..6 {
            for _ in 0..3 {
                ticks.push(b.tick().0);
            }
            let target = if round % 2 == 0 { Owner::Receiver } else { Owner::Host };
            assert!(b.gate.request_transfer(target, TransferConditions::all_met()));
        }
        ticks.push(b.tick().0);

        for t in ticks {
            assert_eq!(b.renderers_at(t), 1, "tick {t}");
        }
    }

    #[test]
    fn transfer_back_to_host_revokes_receiver() {
        let mut b = Bench::started();
        b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met());
        b.tick();
        b.gate.request_transfer(Owner::Host, TransferConditions::all_met());
        b.tick();
        assert_eq!(b.gate.current_owner(), Owner::Host);
        assert_eq!(b.receiver.borrow().revoked, 1);
    }

    // ── forced transfer ───────────────────────────────────────────────────

    #[test]
    fn force_transfer_is_synchronous_and_drops_pending() {
        let mut b = Bench::started();
        b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met());
        b.tick();
        b.host.borrow_mut().active = false;

        b.gate.request_transfer(Owner::Host, TransferConditions::all_met());
        let change = b.gate.force_transfer(Owner::Host).unwrap();
        assert!(change.forced);
        assert_eq!(b.gate.current_owner(), Owner::Host);
        assert!(b.gate.pending_request().is_none());
        // Reactivated so the host slot renders on the very next tick.
        assert!(b.host.borrow().active);
        let (t, _) = b.tick();
        assert_eq!(b.renderers_at(t), 1);
    }

    #[test]
    fn force_transfer_to_current_owner_is_noop() {
        let mut b = Bench::started();
        assert!(b.gate.force_transfer(Owner::Host).is_none());
        assert_eq!(b.gate.transfers(), 0);
    }

    #[test]
    fn inactive_host_does_not_render() {
        let mut b = Bench::started();
        b.host.borrow_mut().active = false;
        let (t, _) = b.tick();
        assert!(!b.host.borrow().rendered.contains(&t));
    }

    #[test]
    fn clear_stops_and_discards() {
        let mut b = Bench::started();
        b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met());
        b.gate.clear();
        assert!(b.gate.pending_request().is_none());
        assert_eq!(b.gate.current_owner(), Owner::None);
        let (_, change) = b.tick();
        assert!(change.is_none());
    }

    #[test]
    fn request_made_early_in_a_tick_waits_for_the_next() {
        let mut b = Bench::started();
        b.tick();
        b.gate.begin_tick(1);
        b.gate.request_transfer(Owner::Receiver, TransferConditions::all_met());
        assert_eq!(b.gate.pending_request().unwrap().requested_at_tick, Some(1));

        // Arbiter of the same tick leaves it queued.
        let info = TickInfo { index: 1, now: b.t0, interval: None };
        assert!(b.gate.arbitrate(&info).is_none());
        b.next = 2;
        let (t, change) = b.tick();
        assert_eq!(t, 2);
        assert_eq!(change.unwrap().to, Owner::Receiver);
    }
}
