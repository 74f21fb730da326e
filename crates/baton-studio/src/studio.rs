use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use baton_core::{HandoffConfig, HandoffCoordinator, Owner, TickSchedule, WarmupState};
use baton_engine::core::{App, AppControl, FrameCtx};
use baton_engine::paint::Color;
use baton_engine::window::{ElementState, KeyCode, PhysicalKey, RuntimeCtx, WindowEvent};

use crate::events::LogEvents;
use crate::producers::{Canvas, LoadingPulse, SceneStub};

#[derive(Debug, Clone)]
pub struct StudioOptions {
    pub config: HandoffConfig,
    /// How long the scene takes to load.
    pub scene_ready_after: Duration,
    /// Stall the scene this long after it first owns the tick.
    pub stall_after: Option<Duration>,
}

impl Default for StudioOptions {
    fn default() -> Self {
        Self {
            config: HandoffConfig::default(),
            scene_ready_after: Duration::from_millis(1500),
            stall_after: None,
        }
    }
}

pub struct Studio {
    coordinator: HandoffCoordinator,
    schedule: TickSchedule,
    canvas: Canvas,
    host: Rc<RefCell<LoadingPulse>>,
    scene: Rc<RefCell<SceneStub>>,
    stall_after: Option<Duration>,
    handed_over_at: Option<Instant>,
    handoff_requested: bool,
    title: String,
    last_now: Option<Instant>,
}

impl Studio {
    pub fn new(options: StudioOptions, now: Instant) -> Result<Self> {
        let coordinator = HandoffCoordinator::with_config(options.config)?;
        let canvas = Canvas::default();

        let host = Rc::new(RefCell::new(LoadingPulse::new(canvas.clone())));
        let scene = Rc::new(RefCell::new(SceneStub::new(
            canvas.clone(),
            now,
            options.scene_ready_after,
        )));

        coordinator.register_host(host.clone());
        coordinator.register_receiver(scene.clone());
        coordinator.set_events(LogEvents);

        let mut schedule = TickSchedule::new();
        coordinator.install(&mut schedule);

        Ok(Self {
            coordinator,
            schedule,
            canvas,
            host,
            scene,
            stall_after: options.stall_after,
            handed_over_at: None,
            handoff_requested: false,
            title: String::new(),
            last_now: None,
        })
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> &HandoffCoordinator {
        &self.coordinator
    }

    /// Runs one tick and returns the color to present, if anyone produced one.
    pub fn step(&mut self, now: Instant) -> Option<Color> {
        self.last_now = Some(now);
        self.scene.borrow_mut().advance(now);

        self.schedule.tick(now);
        self.drive(now);

        self.canvas.take()
    }

    fn drive(&mut self, now: Instant) {
        let c = &self.coordinator;
        if c.is_stopped() {
            return;
        }

        if !c.is_started() {
            match c.warmup_state() {
                WarmupState::Idle => {
                    c.begin_warmup(now);
                }
                state if state.is_open() => {
                    if let Err(e) = c.start(now) {
                        log::error!("could not start handoff: {e}");
                    }
                }
                _ => {}
            }
            return;
        }

        if !self.handoff_requested && c.current_owner() == Owner::Host && self.scene.borrow().is_loaded() {
            self.handoff_requested = c.request_handoff();
        }

        if c.current_owner() == Owner::Receiver && self.handed_over_at.is_none() {
            self.handed_over_at = Some(now);
        }
        if let (Some(after), Some(at)) = (self.stall_after, self.handed_over_at) {
            if now.saturating_duration_since(at) >= after && !self.scene.borrow().is_stalled() {
                self.scene.borrow_mut().set_stalled(true);
                self.stall_after = None;
            }
        }
    }

    fn refresh_title(&mut self, runtime: &mut RuntimeCtx) {
        let title = format!("baton studio | {}", self.coordinator.snapshot());
        if title != self.title {
            runtime.set_title(title.clone());
            self.title = title;
        }
    }

    fn on_key(&mut self, code: KeyCode) -> AppControl {
        let now = self.last_now.unwrap_or_else(Instant::now);
        match code {
            KeyCode::Escape => return self.shutdown(now),
            KeyCode::KeyS => self.scene.borrow_mut().toggle_stall(),
            KeyCode::KeyH => self.coordinator.hide(),
            KeyCode::KeyV => self.coordinator.show(),
            KeyCode::KeyR => self.coordinator.reset_recovery(now),
            KeyCode::KeyD => {
                for line in self.coordinator.diagnostics().entries() {
                    println!("  [{:>5}] {:?} {}", line.level, line.tick, line.message);
                }
            }
            _ => {}
        }
        AppControl::Continue
    }

    pub fn shutdown(&mut self, now: Instant) -> AppControl {
        if !self.coordinator.is_stopped() {
            self.coordinator.stop(&mut self.schedule, now);
            log::info!(
                "stopped after {} ticks, {} scene frames: {} (host disposed: {})",
                self.schedule.ticks(),
                self.scene.borrow().frames(),
                self.coordinator.phase_path().iter().map(|p| p.label()).collect::<Vec<_>>().join(" > "),
                self.host.borrow().is_disposed()
            );
        }
        AppControl::Exit
    }
}

impl App for Studio {
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        match event {
            WindowEvent::CloseRequested => {
                let now = Instant::now();
                self.shutdown(now);
                AppControl::Continue
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                match event.physical_key {
                    PhysicalKey::Code(code) => self.on_key(code),
                    PhysicalKey::Unidentified(_) => AppControl::Continue,
                }
            }
            _ => AppControl::Continue,
        }
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let painted = self.step(ctx.time.now);
        self.refresh_title(ctx.runtime);

        match painted {
            Some(color) => ctx.clear(color),
            None => AppControl::Continue,
        }
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.coordinator.config().stall_poll_interval)
    }

    fn on_poll(&mut self, now: Instant, runtime: &mut RuntimeCtx) -> AppControl {
        self.coordinator.poll(now);
        self.refresh_title(runtime);
        AppControl::Continue
    }
}
