//! Device capability interface.
//!
//! Render objects never reach for a global context: every GPU-touching
//! operation receives a `&mut dyn GraphicsDevice`. The interface follows an
//! immediate-mode binding model:
//! - objects are created/deleted by handle
//! - uploads and attribute setup act on the currently bound buffer
//! - uniforms act on the currently bound program
//! - draws read the bound program and vertex array
//!
//! Implementations:
//! - [`RecordingDevice`]: in-memory, validates binding discipline and records calls
//! - `backend::WgpuDevice`: replays recorded frames through wgpu

mod error;
mod recording;
mod types;

pub use error::RenderError;
pub use recording::{DeviceCall, RecordingDevice};
pub use types::{
    AttributeLayout, BufferId, BufferTarget, ClearMask, DrawIndexed, ElementType, ProgramId,
    StageId, Topology, UniformValue, UsagePattern, VertexArrayId,
};

use glint_shader::ShaderStage;

use crate::paint::Color;

/// Result alias used by device and render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// GPU capabilities consumed by the render core.
pub trait GraphicsDevice {
    // ── shaders ───────────────────────────────────────────────────────────

    fn create_shader_stage(&mut self, stage: ShaderStage) -> RenderResult<StageId>;

    /// Compiles `source` into `stage`. Fails with [`RenderError::Compile`].
    fn compile_shader_stage(&mut self, stage: StageId, source: &str) -> RenderResult<()>;

    fn delete_shader_stage(&mut self, stage: StageId) -> RenderResult<()>;

    fn create_program(&mut self) -> RenderResult<ProgramId>;

    fn attach_shader_stage(&mut self, program: ProgramId, stage: StageId) -> RenderResult<()>;

    fn detach_shader_stage(&mut self, program: ProgramId, stage: StageId) -> RenderResult<()>;

    /// Links the attached stages. Fails with [`RenderError::Link`].
    fn link_program(&mut self, program: ProgramId) -> RenderResult<()>;

    /// Slot of a vertex input, or `None` when the linked program lacks it.
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    /// Slot of a uniform, or `None` when the linked program lacks it.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()>;

    // ── vertex arrays / buffers ───────────────────────────────────────────

    fn create_vertex_array(&mut self) -> RenderResult<VertexArrayId>;

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> RenderResult<()>;

    fn create_buffer(&mut self, target: BufferTarget) -> RenderResult<BufferId>;

    fn delete_buffer(&mut self, buffer: BufferId) -> RenderResult<()>;

    // ── binding ───────────────────────────────────────────────────────────

    /// Binds `program`, or releases the current one with `None`.
    fn bind_program(&mut self, program: Option<ProgramId>) -> RenderResult<()>;

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) -> RenderResult<()>;

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) -> RenderResult<()>;

    // ── data ──────────────────────────────────────────────────────────────

    /// Replaces the contents of the buffer bound to `target` with `data`.
    fn allocate_buffer(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: UsagePattern,
    ) -> RenderResult<()>;

    fn enable_attribute(&mut self, slot: u32) -> RenderResult<()>;

    /// Points attribute `slot` of the bound vertex array at the bound vertex buffer.
    fn set_attribute_buffer(&mut self, slot: u32, layout: AttributeLayout) -> RenderResult<()>;

    /// Sets a uniform on the bound program.
    fn set_uniform(&mut self, slot: u32, value: UniformValue) -> RenderResult<()>;

    // ── frame ─────────────────────────────────────────────────────────────

    fn draw_indexed_range(&mut self, draw: DrawIndexed) -> RenderResult<()>;

    fn clear(&mut self, mask: ClearMask) -> RenderResult<()>;

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> RenderResult<()>;

    fn set_clear_color(&mut self, color: Color) -> RenderResult<()>;
}
