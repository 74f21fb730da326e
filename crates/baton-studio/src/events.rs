use baton_core::{
    CadenceStatus, HandoffEvents, OwnershipChange, PhaseTransition, ReleaseReason, WarmupOutcome,
};

/// Mirrors coordinator notifications to the log.
#[derive(Debug, Default)]
pub struct LogEvents;

impl HandoffEvents for LogEvents {
    fn on_phase_changed(&mut self, transition: &PhaseTransition) {
        log::info!("phase {} -> {} ({})", transition.from, transition.to, transition.reason);
    }

    fn on_transfer_completed(&mut self, change: &OwnershipChange) {
        log::info!("tick handed {} -> {}", change.from, change.to);
    }

    fn on_recovery_start(&mut self, attempt: u32) {
        log::warn!("scene stalled, loading screen took the tick back (attempt {attempt})");
    }

    fn on_recovered(&mut self, attempt: u32) {
        log::info!("frames flowing again after attempt {attempt}");
    }

    fn on_degraded(&mut self, attempts: u32) {
        log::error!("giving up after {attempts} stalls; press R to reset");
    }

    fn on_throttle_detected(&mut self, status: CadenceStatus) {
        log::warn!("frame cadence {status}");
    }

    fn on_stabilized(&mut self) {
        log::info!("frame cadence stable");
    }

    fn on_warmup_complete(&mut self, outcome: WarmupOutcome) {
        log::info!("warmup finished: {outcome:?}");
    }

    fn on_safety_net_released(&mut self, reason: ReleaseReason) {
        log::info!("loading screen released ({reason:?})");
    }
}
