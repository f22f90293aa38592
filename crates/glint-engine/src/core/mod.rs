//! Core engine-facing contracts.
//!
//! Defines the interface between the runtime (platform loop) and the
//! application, without leaking winit or wgpu internals into user code.

mod app;

pub use app::{App, AppControl};
