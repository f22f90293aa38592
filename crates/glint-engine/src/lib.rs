//! Glint engine crate.
//!
//! Render objects, a scene registry and a viewport controller over an
//! injectable [`device::GraphicsDevice`], plus the wgpu backend and window
//! runtime that drive them.

pub mod backend;
pub mod core;
pub mod device;
pub mod window;

pub mod logging;
pub mod paint;
pub mod render;
pub mod scene;
pub mod viewport;

/// Built-in composite shader: an MVP-transformed 2D position and a flat
/// `u_color`.
pub const DEFAULT_SHADER: &str = include_str!("../shaders/simpleshader.wgsl");
