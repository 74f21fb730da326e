use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::core::{App, AppControl, FrameCtx};
use crate::device::{Gpu, GpuInit};
use crate::time::FrameClock;

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    /// Minimum spacing between redraws. `None` redraws as fast as the
    /// present mode allows.
    ///
    /// Setting this to ~100 ms reproduces a throttled background scheduler.
    pub frame_interval: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "baton".to_string(),
            initial_size: LogicalSize::new(960.0, 540.0),
            frame_interval: None,
        }
    }
}

/// Runtime context passed to the application.
///
/// Commands are buffered and applied after the current callback returns.
#[derive(Debug, Default)]
pub struct RuntimeCtx {
    commands: Vec<Command>,
}

impl RuntimeCtx {
    pub fn exit(&mut self) {
        self.commands.push(Command::Exit);
    }

    /// Last title set within one callback wins.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.commands.push(Command::SetTitle(title.into()));
    }

    pub fn exit_requested(&self) -> bool {
        self.commands.iter().any(|c| matches!(c, Command::Exit))
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    SetTitle(String),
    Exit,
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    pub fn run<A>(config: RuntimeConfig, gpu_init: GpuInit, app: A) -> Result<()>
    where
        A: App + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(config, gpu_init, app);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        match state.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[self_referencing]
struct WindowEntry {
    clock: FrameClock,

    window: Window,

    #[borrows(window)]
    #[covariant]
    gpu: Gpu<'this>,
}

struct AppState<A>
where
    A: App + 'static,
{
    config: RuntimeConfig,
    gpu_init: GpuInit,
    app: A,

    entry: Option<WindowEntry>,
    exit_requested: bool,
    fatal: Option<anyhow::Error>,

    next_poll: Option<Instant>,
    last_redraw: Option<Instant>,
}

impl<A> AppState<A>
where
    A: App + 'static,
{
    fn new(config: RuntimeConfig, gpu_init: GpuInit, app: A) -> Self {
        Self {
            config,
            gpu_init,
            app,
            entry: None,
            exit_requested: false,
            fatal: None,
            next_poll: None,
            last_redraw: None,
        }
    }

    fn create_window_entry(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let gpu_init = self.gpu_init.clone();
        let entry = WindowEntryTryBuilder {
            clock: FrameClock::default(),
            window,
            gpu_builder: |w| {
                pollster::block_on(Gpu::new(w, gpu_init)).context("GPU initialization failed")
            },
        }
        .try_build()?;

        self.entry = Some(entry);
        Ok(())
    }

    fn apply_commands(&mut self, event_loop: &ActiveEventLoop, ctx: RuntimeCtx) {
        for cmd in ctx.commands {
            match cmd {
                Command::SetTitle(title) => {
                    if let Some(entry) = &self.entry {
                        entry.with_window(|w| w.set_title(&title));
                    }
                }
                Command::Exit => self.exit_requested = true,
            }
        }

        if self.exit_requested {
            event_loop.exit();
        }
    }

    fn run_poll(&mut self, event_loop: &ActiveEventLoop, now: Instant) {
        let Some(interval) = self.app.poll_interval() else {
            self.next_poll = None;
            return;
        };
        if self.next_poll.is_some_and(|at| now < at) {
            return;
        }

        let mut ctx = RuntimeCtx::default();
        if self.app.on_poll(now, &mut ctx) == AppControl::Exit {
            ctx.exit();
        }
        self.next_poll = Some(now + interval);
        self.apply_commands(event_loop, ctx);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let mut runtime_ctx = RuntimeCtx::default();
        let mut control = AppControl::Continue;

        let app = &mut self.app;
        if let Some(entry) = self.entry.as_mut() {
            entry.with_mut(|fields| {
                let time = fields.clock.tick();
                let mut ctx = FrameCtx {
                    window: fields.window,
                    gpu: fields.gpu,
                    time,
                    runtime: &mut runtime_ctx,
                };
                control = app.on_frame(&mut ctx);
            });
        }
        self.last_redraw = Some(Instant::now());

        if control == AppControl::Exit {
            runtime_ctx.exit();
        }
        self.apply_commands(event_loop, runtime_ctx);
    }
}

impl<A> ApplicationHandler for AppState<A>
where
    A: App + 'static,
{
    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        if self.entry.is_none() || self.exit_requested {
            return;
        }
        if matches!(cause, StartCause::Init) {
            return;
        }
        self.run_poll(event_loop, Instant::now());
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.entry.is_some() {
            return;
        }

        if let Err(e) = self.create_window_entry(event_loop) {
            log::error!("failed to create window: {e:#}");
            self.fatal = Some(e);
            self.exit_requested = true;
            event_loop.exit();
            return;
        }

        if let Some(entry) = &self.entry {
            entry.with_window(|w| w.request_redraw());
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }
        let Some(entry) = &self.entry else {
            return;
        };

        let now = Instant::now();
        let frame_due = next_frame_at(self.last_redraw, self.config.frame_interval, now);
        if frame_due <= now {
            entry.with_window(|w| w.request_redraw());
        }

        let wake = earliest(self.next_poll, (frame_due > now).then_some(frame_due));
        event_loop.set_control_flow(match wake {
            Some(at) => ControlFlow::WaitUntil(at),
            None => ControlFlow::Wait,
        });
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        if self.app.on_window_event(&event) == AppControl::Exit {
            self.exit_requested = true;
            event_loop.exit();
            return;
        }

        match &event {
            WindowEvent::CloseRequested => {
                self.exit_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                if let Some(entry) = self.entry.as_mut() {
                    entry.with_gpu_mut(|gpu| gpu.resize(*new_size));
                    entry.with_window(|w| w.request_redraw());
                }
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(entry) = self.entry.as_mut() {
                    let new_size = entry.with_window(|w| w.inner_size());
                    entry.with_gpu_mut(|gpu| gpu.resize(new_size));
                    entry.with_window(|w| w.request_redraw());
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Surface must go before the window it borrows; the entry drops both in order.
        self.entry = None;
        log::info!("runtime exiting");
    }
}

fn next_frame_at(last: Option<Instant>, interval: Option<Duration>, now: Instant) -> Instant {
    match (last, interval) {
        (Some(last), Some(interval)) => last + interval,
        _ => now,
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
