//! Frame-ownership handoff for render surfaces that must never go idle.
//!
//! A *host* producer (a loading animation) owns every tick until a *receiver*
//! (the loaded application) is ready, then hands the tick over atomically.
//! If the receiver stalls, ownership is reclaimed for the host; throttled
//! cadence re-arms a safety net that keeps the host warm.
//!
//! This crate only depends on the `log` facade. The embedder drives a
//! [`TickSchedule`] once per frame and calls [`HandoffCoordinator::poll`]
//! from a wall-clock timer.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`schedule`] | `TickSchedule`, `TickInfo`, fixed priorities |
//! | [`gate`] | `ArbitrationGate`: who owns the tick, queued transfers |
//! | [`recovery`] | `RecoveryController`: stall detection and reclaim |
//! | [`cadence`] | `CadenceClassifier`: healthy / throttled intervals |
//! | [`warmup`] | `WarmupGate` and its `WarmupWait` future |
//! | [`safety_net`] | `SafetyNet`: keeps the host warm after a handoff |
//! | [`coordinator`] | `HandoffCoordinator`: lifecycle, phases, observer hooks |
//! | [`config`] | `HandoffConfig` |
//! | [`diagnostics`] | `DiagnosticsLog`: bounded diagnostic lines |
//!
//! # Quick start
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::{Duration, Instant};
//!
//! use baton_core::{
//!     HandoffConfig, HandoffCoordinator, HostProducer, Owner, ReceiverProducer, TickInfo,
//!     TickSchedule, TransferConditions,
//! };
//!
//! struct Spinner {
//!     active: bool,
//! }
//!
//! impl HostProducer for Spinner {
//!     fn id(&self) -> &str { "spinner" }
//!     fn is_active(&self) -> bool { self.active }
//!     fn activate(&mut self) -> bool { self.active = true; true }
//!     fn deactivate(&mut self) { self.active = false; }
//!     fn render_tick(&mut self, _tick: &TickInfo) {}
//! }
//!
//! struct Scene;
//!
//! impl ReceiverProducer for Scene {
//!     fn id(&self) -> &str { "scene" }
//!     fn can_accept_transfer(&self) -> TransferConditions { TransferConditions::all_met() }
//!     fn report_tick_rendered(&mut self, _tick: &TickInfo) -> bool { true }
//! }
//!
//! let coordinator = HandoffCoordinator::with_config(HandoffConfig::default()).unwrap();
//! coordinator.register_host(Rc::new(RefCell::new(Spinner { active: false })));
//! coordinator.register_receiver(Rc::new(RefCell::new(Scene)));
//!
//! let mut schedule = TickSchedule::new();
//! coordinator.install(&mut schedule);
//!
//! let t0 = Instant::now();
//! coordinator.start(t0).unwrap();
//! assert!(coordinator.request_transfer(Owner::Receiver, TransferConditions::all_met()));
//!
//! schedule.tick(t0 + Duration::from_millis(16));
//! assert_eq!(coordinator.current_owner(), Owner::Receiver);
//! ```

pub mod cadence;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod owner;
pub mod producer;
pub mod recovery;
pub mod safety_net;
pub mod schedule;
pub mod warmup;

#[cfg(test)]
mod testing;

pub use cadence::{CadenceClassifier, CadenceEvent, CadenceStatus, CadenceThresholds};
pub use config::HandoffConfig;
pub use coordinator::{HandoffCoordinator, HandoffEvents, HandoffSnapshot};
pub use diagnostics::{DiagnosticEntry, DiagnosticsLog};
pub use error::{ConfigError, StartError, TransferRejection};
pub use gate::{ArbitrationGate, OwnershipChange, TransferRequest};
pub use owner::{Owner, Phase, PhaseLog, PhaseTransition};
pub use producer::{HostProducer, ReceiverProducer, SharedHost, SharedReceiver, TransferConditions};
pub use recovery::{RecoveryAction, RecoveryController, RecoveryState, RecoveryTransition};
pub use safety_net::{ReleaseReason, SafetyNet, SafetyNetState};
pub use schedule::{CallbackId, TickInfo, TickSchedule};
pub use warmup::{WarmupGate, WarmupOutcome, WarmupState, WarmupWait};
