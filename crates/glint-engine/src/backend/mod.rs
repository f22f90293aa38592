//! wgpu backend.
//!
//! [`Gpu`] owns the instance, surface and per-size render targets.
//! [`WgpuDevice`] implements [`GraphicsDevice`](crate::device::GraphicsDevice)
//! on top of it, validating WGSL through naga at compile/link time.

mod gpu;
mod init;
mod reflect;
mod surface;
mod wgpu_device;

pub use gpu::{DEPTH_FORMAT, FrameTarget, Gpu, GpuFrame};
pub use init::GpuInit;
pub use surface::SurfaceErrorAction;
pub use wgpu_device::WgpuDevice;
