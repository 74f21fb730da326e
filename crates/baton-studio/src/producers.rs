//! Demo producers: a pulsing loading screen and a scene that takes a while to load.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use baton_core::{HostProducer, ReceiverProducer, TickInfo, TransferConditions};
use baton_engine::paint::Color;

/// Clear color for the current tick. Whoever owns the tick writes it; the
/// frame callback takes it.
#[derive(Debug, Clone, Default)]
pub struct Canvas(Rc<Cell<Option<Color>>>);

impl Canvas {
    pub fn paint(&self, color: Color) {
        self.0.set(Some(color));
    }

    pub fn take(&self) -> Option<Color> {
        self.0.take()
    }
}

// ── host ──────────────────────────────────────────────────────────────────

pub struct LoadingPulse {
    canvas: Canvas,
    active: bool,
    disposed: bool,
    phase: f32,
    period: Duration,
    dim: Color,
    bright: Color,
}

impl LoadingPulse {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            active: false,
            disposed: false,
            phase: 0.0,
            period: Duration::from_millis(1200),
            dim: Color::from_srgb_u8(0x1b, 0x1d, 0x2b, 0xff),
            bright: Color::from_srgb_u8(0x3c, 0x46, 0x78, 0xff),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl HostProducer for LoadingPulse {
    fn id(&self) -> &str {
        "loading-pulse"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn activate(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.active = true;
        true
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn render_tick(&mut self, tick: &TickInfo) {
        let dt = tick.interval.unwrap_or_default().as_secs_f32();
        self.phase = (self.phase + dt / self.period.as_secs_f32()).fract();
        let t = 0.5 - 0.5 * (self.phase * std::f32::consts::TAU).cos();
        self.canvas.paint(self.dim.lerp(self.bright, t));
    }

    fn can_provide(&self) -> bool {
        !self.disposed
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.active = false;
    }
}

// ── receiver ──────────────────────────────────────────────────────────────

pub struct SceneStub {
    canvas: Canvas,
    created_at: Instant,
    ready_after: Duration,
    loaded: bool,
    stalled: bool,
    frames: u64,
    color: Color,
}

impl SceneStub {
    pub fn new(canvas: Canvas, created_at: Instant, ready_after: Duration) -> Self {
        Self {
            canvas,
            created_at,
            ready_after,
            loaded: false,
            stalled: false,
            frames: 0,
            color: Color::from_srgb_u8(0x2e, 0x8b, 0x57, 0xff),
        }
    }

    /// Advances loading. Returns `true` on the call that finishes it.
    pub fn advance(&mut self, now: Instant) -> bool {
        if self.loaded || now.saturating_duration_since(self.created_at) < self.ready_after {
            return false;
        }
        self.loaded = true;
        log::info!("scene loaded after {:?}", now.saturating_duration_since(self.created_at));
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn set_stalled(&mut self, stalled: bool) {
        if self.stalled != stalled {
            log::info!("scene {}", if stalled { "stalled" } else { "resumed" });
        }
        self.stalled = stalled;
    }

    pub fn toggle_stall(&mut self) {
        self.set_stalled(!self.stalled);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl ReceiverProducer for SceneStub {
    fn id(&self) -> &str {
        "scene"
    }

    fn can_accept_transfer(&self) -> TransferConditions {
        TransferConditions {
            transform_valid: self.loaded,
            projection_ready: self.loaded,
            can_draw_one_frame: self.loaded && !self.stalled,
            cadence_healthy: true,
            cadence_stable: true,
        }
    }

    fn on_transfer_accepted(&mut self) {
        log::debug!("scene accepted the tick after {} frames", self.frames);
    }

    fn on_transfer_revoked(&mut self) {
        log::debug!("scene lost the tick");
    }

    fn report_tick_rendered(&mut self, _tick: &TickInfo) -> bool {
        if self.stalled {
            return false;
        }
        self.frames += 1;
        self.canvas.paint(self.color);
        true
    }
}
