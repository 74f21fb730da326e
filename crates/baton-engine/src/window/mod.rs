//! Window and runtime loop.
//!
//! Owns the `winit` event loop and the single window, and wires them to the
//! GPU layer.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
pub use winit::event::{ElementState, WindowEvent};
pub use winit::keyboard::{KeyCode, PhysicalKey};
