//! Baton engine crate.
//!
//! A single-window `winit` + `wgpu` frame loop. Every redraw is one tick for
//! the application; a separate wall-clock timer drives `App::on_poll` so stall
//! detection keeps running when redraws stop arriving.

pub mod core;
pub mod device;
pub mod logging;
pub mod paint;
pub mod time;
pub mod window;
