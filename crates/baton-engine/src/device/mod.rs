//! GPU device and surface management.
//!
//! Creates the wgpu adapter, device and queue, keeps the window surface
//! configured, and hands out one frame at a time for clearing.

mod gpu;
mod surface;

pub use gpu::{Gpu, GpuFrame, GpuInit, SurfaceErrorAction};
