use std::time::{Duration, Instant};

use winit::event::WindowEvent;

use super::ctx::FrameCtx;
use crate::window::RuntimeCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract driven by [`Runtime`](crate::window::Runtime).
pub trait App {
    /// Called for every window event before the runtime handles it.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// Called once per redraw. One call is one tick.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl;

    /// Cadence of [`on_poll`](Self::on_poll). `None` disables the timer.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Wall-clock timer, independent of redraws.
    fn on_poll(&mut self, now: Instant, runtime: &mut RuntimeCtx) -> AppControl {
        let _ = (now, runtime);
        AppControl::Continue
    }
}
