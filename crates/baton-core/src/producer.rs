//! Collaborator contracts for the two frame producers.
//!
//! Both producers are shared, single-threaded handles (`Rc<RefCell<_>>`):
//! the application keeps one clone to drive loading, the coordinator keeps
//! another to hand out ticks.
//!
//! Lifecycle methods (`activate`, `deactivate`, `on_transfer_accepted`,
//! `on_transfer_revoked`) run while the coordinator is mid-update and must not
//! call back into it. Per-tick methods (`render_tick`, `report_tick_rendered`)
//! run with the coordinator released and may.

use std::cell::RefCell;
use std::rc::Rc;

use crate::schedule::TickInfo;

/// Readiness flags supplied by the receiver. A transfer needs all of them.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct TransferConditions {
    /// Geometry / transforms are valid.
    pub transform_valid: bool,
    pub projection_ready: bool,
    pub can_draw_one_frame: bool,
    pub cadence_healthy: bool,
    pub cadence_stable: bool,
}

impl TransferConditions {
    pub const fn all_met() -> Self {
        Self {
            transform_valid: true,
            projection_ready: true,
            can_draw_one_frame: true,
            cadence_healthy: true,
            cadence_stable: true,
        }
    }

    #[inline]
    pub fn is_satisfied(&self) -> bool {
        self.unmet().is_empty()
    }

    /// Names of the flags that are still false.
    pub fn unmet(&self) -> Vec<&'static str> {
        [
            ("transform_valid", self.transform_valid),
            ("projection_ready", self.projection_ready),
            ("can_draw_one_frame", self.can_draw_one_frame),
            ("cadence_healthy", self.cadence_healthy),
            ("cadence_stable", self.cadence_stable),
        ]
        .into_iter()
        .filter_map(|(name, ok)| (!ok).then_some(name))
        .collect()
    }

    /// ANDs the cadence flags with an independent cadence reading.
    pub fn with_cadence(mut self, healthy: bool, stable: bool) -> Self {
        self.cadence_healthy &= healthy;
        self.cadence_stable &= stable;
        self
    }
}

/// Loading-phase producer. Owns the tick until the receiver is ready.
pub trait HostProducer {
    fn id(&self) -> &str;

    fn is_active(&self) -> bool;

    /// Brings the producer (back) up. Returns `false` if it could not.
    fn activate(&mut self) -> bool;

    fn deactivate(&mut self);

    /// Produces this tick's frame. Called only while the host owns the tick.
    fn render_tick(&mut self, tick: &TickInfo);

    /// Whether the host can take the tick back right now.
    fn can_provide(&self) -> bool {
        true
    }

    /// Final teardown on stop.
    fn dispose(&mut self) {}
}

/// Fully-loaded application producer.
pub trait ReceiverProducer {
    fn id(&self) -> &str;

    fn can_accept_transfer(&self) -> TransferConditions;

    fn on_transfer_accepted(&mut self) {}

    fn on_transfer_revoked(&mut self) {}

    /// Produces or reports this tick's frame. Called only while the receiver
    /// owns the tick; returns `false` if nothing was produced.
    fn report_tick_rendered(&mut self, tick: &TickInfo) -> bool;
}

pub type SharedHost = Rc<RefCell<dyn HostProducer>>;
pub type SharedReceiver = Rc<RefCell<dyn ReceiverProducer>>;
