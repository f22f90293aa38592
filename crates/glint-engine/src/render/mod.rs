//! Drawable objects.
//!
//! A [`RenderableObject`] owns its program, vertex array and buffers through
//! handles obtained from a [`GraphicsDevice`](crate::device::GraphicsDevice)
//! passed into every call. Geometry is 2D positions plus an index buffer
//! drawn as one or more [`DrawRange`]s.

mod object;
mod range;

pub use object::{
    BufferDescriptor, BufferUpload, COLOR_UNIFORM, MVP_UNIFORM, ObjectId, ObjectState,
    POSITION_ATTRIBUTE, RenderableObject, ShaderLocations, default_projection,
};
pub use range::{DrawRange, OVERRIDE_COLOR};
