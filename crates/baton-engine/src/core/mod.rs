//! Engine-facing contracts.
//!
//! The stable interface between the runtime (platform loop) and the
//! application driving a tick schedule.

mod app;
mod ctx;

pub use app::{App, AppControl};
pub use ctx::FrameCtx;
