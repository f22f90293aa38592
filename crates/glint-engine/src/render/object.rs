use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;
use glint_shader::{ShaderSource, ShaderStage};

use crate::device::{
    AttributeLayout, BufferId, BufferTarget, DrawIndexed, ElementType, GraphicsDevice, ProgramId,
    RenderError, RenderResult, StageId, Topology, UniformValue, UsagePattern, VertexArrayId,
};
use crate::paint::Color;
use crate::scene::RegistryId;

use super::range::DrawRange;

/// Vertex input the position data is bound to.
pub const POSITION_ATTRIBUTE: &str = "position";
/// `mat4` uniform receiving projection × view × model.
pub const MVP_UNIFORM: &str = "u_mvp";
/// `vec4` uniform receiving the draw color.
pub const COLOR_UNIFORM: &str = "u_color";

/// Components per vertex in uploaded position data.
const VERTEX_COMPONENTS: usize = 2;

/// Projection every object starts with: orthographic, `[-2, 2]` on both axes.
pub fn default_projection() -> Mat4 {
    Mat4::orthographic_rh(-2.0, 2.0, -2.0, 2.0, -0.1, 100.0)
}

// ── identity ──────────────────────────────────────────────────────────────

/// Process-unique identity of a [`RenderableObject`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ── descriptors ───────────────────────────────────────────────────────────

/// Slots cached from the linked program. `None` marks a slot the program
/// does not expose (for example a uniform the compiler optimized away).
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ShaderLocations {
    pub position: Option<u32>,
    pub mvp: Option<u32>,
    pub color: Option<u32>,
}

/// Result of the last successful upload into a buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BufferUpload {
    pub handle: BufferId,
    pub byte_len: usize,
    pub element_count: usize,
}

/// CPU-side description of one GPU buffer.
///
/// Either unallocated (`upload() == None`) or allocated with contents equal
/// to the last upload. There is no in-between state.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDescriptor {
    pub element_type: ElementType,
    pub usage: UsagePattern,
    upload: Option<BufferUpload>,
}

impl BufferDescriptor {
    fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            usage: UsagePattern::Static,
            upload: None,
        }
    }

    #[inline]
    pub fn upload(&self) -> Option<&BufferUpload> {
        self.upload.as_ref()
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.upload.is_some()
    }
}

/// Where an object is in its lifecycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ObjectState {
    /// Constructed; no GPU handles yet.
    Empty,
    /// Between `create_objects` and `destroy`.
    Live,
    /// Terminal.
    Destroyed,
}

#[derive(Debug)]
struct GpuHandles {
    program: ProgramId,
    vertex_array: Option<VertexArrayId>,
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
    stages: Vec<StageId>,
}

#[derive(Debug)]
enum Lifecycle {
    Empty,
    Live(GpuHandles),
    Destroyed,
}

// ── object ────────────────────────────────────────────────────────────────

/// One drawable: a program, a vertex array, a vertex and an index buffer,
/// plus transform and color state.
///
/// Lifecycle: [`new`](Self::new) → [`create_objects`](Self::create_objects)
/// → [`build_shader`](Self::build_shader) → [`bind_all`](Self::bind_all) /
/// [`allocate_data`](Self::allocate_data) / [`unbind_all`](Self::unbind_all)
/// → [`draw_call`](Self::draw_call) per frame → [`destroy`](Self::destroy).
/// Every operation outside its window fails with [`RenderError::InvalidState`].
#[derive(Debug)]
pub struct RenderableObject {
    id: ObjectId,
    name: String,
    lifecycle: Lifecycle,
    locations: Option<ShaderLocations>,
    bound: bool,

    vertex_buffer: BufferDescriptor,
    index_buffer: BufferDescriptor,

    topology: Topology,
    count: usize,
    color: Color,
    ranges: Vec<DrawRange>,

    model: Mat4,
    view: Mat4,
    projection: Mat4,
    mvp: Mat4,

    registry: Option<RegistryId>,
    dirty: bool,
}

impl RenderableObject {
    pub fn new(name: impl Into<String>) -> Self {
        let projection = default_projection();
        Self {
            id: ObjectId::next(),
            name: name.into(),
            lifecycle: Lifecycle::Empty,
            locations: None,
            bound: false,
            vertex_buffer: BufferDescriptor::new(ElementType::F32),
            index_buffer: BufferDescriptor::new(ElementType::U32),
            topology: Topology::Triangles,
            count: 0,
            color: Color::new(1.0, 1.0, 1.0, 0.0),
            ranges: DrawRange::default_pair(),
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection,
            mvp: projection,
            registry: None,
            dirty: false,
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ObjectState {
        match self.lifecycle {
            Lifecycle::Empty => ObjectState::Empty,
            Lifecycle::Live(_) => ObjectState::Live,
            Lifecycle::Destroyed => ObjectState::Destroyed,
        }
    }

    /// Registry this object is currently stamped with.
    #[inline]
    pub fn registry(&self) -> Option<RegistryId> {
        self.registry
    }

    #[inline]
    pub(crate) fn set_registry(&mut self, registry: Option<RegistryId>) {
        self.registry = registry;
    }

    /// Cached slots; `None` until a program linked successfully.
    #[inline]
    pub fn locations(&self) -> Option<ShaderLocations> {
        self.locations
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &BufferDescriptor {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &BufferDescriptor {
        &self.index_buffer
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    #[inline]
    pub fn draw_ranges(&self) -> &[DrawRange] {
        &self.ranges
    }

    #[inline]
    pub fn model(&self) -> Mat4 {
        self.model
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        self.view
    }

    #[inline]
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// `projection * view * model`, always current.
    #[inline]
    pub fn mvp(&self) -> Mat4 {
        self.mvp
    }

    /// True inside a `bind_all` / `unbind_all` scope.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Set by every successful upload. Nothing in the engine reads it; callers
    /// that skip redundant uploads can use it together with [`mark_clean`](Self::mark_clean).
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn live(&self, op: &str) -> RenderResult<&GpuHandles> {
        match &self.lifecycle {
            Lifecycle::Live(h) => Ok(h),
            Lifecycle::Empty => Err(RenderError::invalid_state(format!(
                "{op} on '{}' before create_objects",
                self.name
            ))),
            Lifecycle::Destroyed => Err(RenderError::invalid_state(format!(
                "{op} on '{}' after destroy",
                self.name
            ))),
        }
    }

    fn live_mut(&mut self, op: &str) -> RenderResult<&mut GpuHandles> {
        self.live(op)?;
        match &mut self.lifecycle {
            Lifecycle::Live(h) => Ok(h),
            _ => Err(RenderError::invalid_state(format!("{op} on '{}' outside its lifetime", self.name))),
        }
    }

    // ── creation ──────────────────────────────────────────────────────────

    /// Allocates program, vertex array, vertex buffer and index buffer handles.
    pub fn create_objects(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        match self.lifecycle {
            Lifecycle::Empty => {}
            Lifecycle::Live(_) => {
                return Err(RenderError::invalid_state(format!(
                    "create_objects called twice on '{}' without destroy",
                    self.name
                )));
            }
            Lifecycle::Destroyed => {
                return Err(RenderError::invalid_state(format!(
                    "create_objects on destroyed '{}'",
                    self.name
                )));
            }
        }

        let program = dev.create_program()?;
        let (vertex_array, vertex_buffer, index_buffer) = match create_attribute_handles(dev) {
            Ok(handles) => handles,
            Err(e) => {
                let _ = dev.delete_program(program);
                return Err(e);
            }
        };

        log::debug!(
            "'{}': created program {program:?}, vertex array {vertex_array:?}, buffers {vertex_buffer:?}/{index_buffer:?}",
            self.name
        );

        self.lifecycle = Lifecycle::Live(GpuHandles {
            program,
            vertex_array: Some(vertex_array),
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            stages: Vec::new(),
        });
        Ok(())
    }

    /// Splits the composite source at `path` and builds it, see
    /// [`build_shader_source`](Self::build_shader_source).
    pub fn build_shader(
        &mut self,
        dev: &mut dyn GraphicsDevice,
        path: impl AsRef<Path>,
    ) -> RenderResult<()> {
        let path = path.as_ref();
        self.live("build_shader")?;
        let source = glint_shader::load_file(path)?;
        log::debug!("'{}': loaded shader source {}", self.name, path.display());
        self.build_shader_source(dev, &source)
    }

    /// Compiles both stages, links them, binds the program and caches the
    /// position/MVP/color slots.
    ///
    /// On failure every stage created here is released and the object keeps
    /// no locations, so it cannot upload or draw.
    pub fn build_shader_source(
        &mut self,
        dev: &mut dyn GraphicsDevice,
        source: &ShaderSource,
    ) -> RenderResult<()> {
        let program = self.live("build_shader")?.program;
        if self.locations.is_some() {
            return Err(RenderError::invalid_state(format!(
                "shader for '{}' is already built",
                self.name
            )));
        }
        for stage in &source.replaced {
            log::warn!(
                "'{}': duplicate #shader {stage} section, the last one replaced the earlier ones",
                self.name
            );
        }

        let mut created = Vec::with_capacity(2);
        let mut attached = Vec::with_capacity(2);
        if let Err(e) = compile_and_link(dev, program, source, &mut created, &mut attached) {
            for &stage in &attached {
                let _ = dev.detach_shader_stage(program, stage);
            }
            for &stage in &created {
                let _ = dev.delete_shader_stage(stage);
            }
            log::error!("'{}': {e}", self.name);
            return Err(e);
        }

        self.live_mut("build_shader")?.stages = created;
        dev.bind_program(Some(program))?;

        let locations = ShaderLocations {
            position: dev.attribute_location(program, POSITION_ATTRIBUTE),
            mvp: dev.uniform_location(program, MVP_UNIFORM),
            color: dev.uniform_location(program, COLOR_UNIFORM),
        };
        for (name, slot) in [
            (POSITION_ATTRIBUTE, locations.position),
            (MVP_UNIFORM, locations.mvp),
            (COLOR_UNIFORM, locations.color),
        ] {
            if slot.is_none() {
                log::debug!("'{}': program does not expose '{name}'", self.name);
            }
        }
        self.locations = Some(locations);
        Ok(())
    }

    // ── state setters ─────────────────────────────────────────────────────

    pub fn set_datatype(&mut self, vertex: ElementType, index: ElementType) {
        self.vertex_buffer.element_type = vertex;
        self.index_buffer.element_type = index;
    }

    /// Applies to both buffers on the next upload.
    pub fn set_usage_pattern(&mut self, usage: UsagePattern) {
        self.vertex_buffer.usage = usage;
        self.index_buffer.usage = usage;
    }

    pub fn set_primitives(&mut self, topology: Topology) {
        self.topology = topology;
    }

    /// Element count of the geometry; informational only.
    pub fn set_count(&mut self, count: usize) {
        self.count = count;
    }

    /// Channels are clamped to `[0, 1]`.
    pub fn set_color(&mut self, color: Color) {
        self.color = color.clamped();
    }

    /// Replaces the index sub-ranges drawn by [`draw_call`](Self::draw_call).
    pub fn set_draw_ranges(&mut self, ranges: Vec<DrawRange>) {
        self.ranges = ranges;
    }

    pub fn set_model_mat(&mut self, model: Mat4) {
        self.model = model;
        self.update_mvp();
    }

    pub fn set_view_mat(&mut self, view: Mat4) {
        self.view = view;
        self.update_mvp();
    }

    pub fn set_proj_mat(&mut self, projection: Mat4) {
        self.projection = projection;
        self.update_mvp();
    }

    fn update_mvp(&mut self) {
        self.mvp = self.projection * self.view * self.model;
    }

    // ── binding ───────────────────────────────────────────────────────────

    /// Opens a bind scope: program, vertex array, vertex buffer, index buffer.
    pub fn bind_all(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let handles = self.live("bind_all")?;
        if self.bound {
            return Err(RenderError::invalid_state(format!(
                "bind_all on '{}' while already bound",
                self.name
            )));
        }
        if self.locations.is_none() {
            return Err(RenderError::invalid_state(format!(
                "bind_all on '{}' before its shader was built",
                self.name
            )));
        }
        let program = handles.program;
        let vertex_array = require(handles.vertex_array, &self.name, "vertex array")?;
        let vertex_buffer = require(handles.vertex_buffer, &self.name, "vertex buffer")?;
        let index_buffer = require(handles.index_buffer, &self.name, "index buffer")?;

        dev.bind_program(Some(program))?;
        dev.bind_vertex_array(Some(vertex_array))?;
        dev.bind_buffer(BufferTarget::Vertex, Some(vertex_buffer))?;
        dev.bind_buffer(BufferTarget::Index, Some(index_buffer))?;
        self.bound = true;
        Ok(())
    }

    /// Closes the bind scope, releasing in the same order as [`bind_all`](Self::bind_all).
    pub fn unbind_all(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        self.live("unbind_all")?;
        if !self.bound {
            return Err(RenderError::invalid_state(format!(
                "unbind_all on '{}' without a matching bind_all",
                self.name
            )));
        }
        release_bindings(dev)?;
        self.bound = false;
        Ok(())
    }

    // ── upload ────────────────────────────────────────────────────────────

    /// Uploads 2D positions and indices. Must run inside a bind scope.
    ///
    /// Uploaded byte lengths are `vertices.len() * 4` and
    /// `indices.len() * index element size`.
    pub fn allocate_data(
        &mut self,
        dev: &mut dyn GraphicsDevice,
        vertices: &[f32],
        indices: &[u32],
    ) -> RenderResult<()> {
        let handles = self.live("allocate_data")?;
        let vertex_handle = require(handles.vertex_buffer, &self.name, "vertex buffer")?;
        let index_handle = require(handles.index_buffer, &self.name, "index buffer")?;
        if !self.bound {
            return Err(RenderError::invalid_state(format!(
                "allocate_data on '{}' outside a bind_all/unbind_all scope",
                self.name
            )));
        }
        let locations = self.locations.ok_or_else(|| {
            RenderError::invalid_state(format!(
                "allocate_data on '{}' before its shader was built",
                self.name
            ))
        })?;

        if self.vertex_buffer.element_type != ElementType::F32 {
            return Err(RenderError::precondition(format!(
                "vertex data is f32 but '{}' declares {:?}",
                self.name, self.vertex_buffer.element_type
            )));
        }
        if vertices.len() % VERTEX_COMPONENTS != 0 {
            return Err(RenderError::precondition(format!(
                "{} floats is not a whole number of {VERTEX_COMPONENTS}-component vertices",
                vertices.len()
            )));
        }
        let vertex_count = vertices.len() / VERTEX_COMPONENTS;
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(RenderError::precondition(format!(
                "index {bad} references a vertex past the end ({vertex_count} vertices)"
            )));
        }
        let index_bytes = pack_indices(indices, self.index_buffer.element_type)?;
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);

        dev.allocate_buffer(BufferTarget::Vertex, vertex_bytes, self.vertex_buffer.usage)?;
        match locations.position {
            Some(slot) => {
                dev.enable_attribute(slot)?;
                dev.set_attribute_buffer(
                    slot,
                    AttributeLayout {
                        element: ElementType::F32,
                        offset: 0,
                        components: VERTEX_COMPONENTS as u32,
                        stride: 0,
                    },
                )?;
            }
            None => log::warn!(
                "'{}': program has no '{POSITION_ATTRIBUTE}' input; vertex layout not bound",
                self.name
            ),
        }
        self.vertex_buffer.upload = Some(BufferUpload {
            handle: vertex_handle,
            byte_len: vertex_bytes.len(),
            element_count: vertices.len(),
        });

        dev.allocate_buffer(BufferTarget::Index, &index_bytes, self.index_buffer.usage)?;
        self.index_buffer.upload = Some(BufferUpload {
            handle: index_handle,
            byte_len: index_bytes.len(),
            element_count: indices.len(),
        });

        self.dirty = true;
        log::debug!(
            "'{}': uploaded {} vertex bytes, {} index bytes",
            self.name,
            vertex_bytes.len(),
            index_bytes.len()
        );
        Ok(())
    }

    // ── draw ──────────────────────────────────────────────────────────────

    /// Binds program + vertex array, pushes color and MVP, then issues one
    /// indexed draw per range, re-pushing the color only when a range
    /// changes it. Releases program and vertex array afterwards.
    pub fn draw_call(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let handles = self.live("draw_call")?;
        let program = handles.program;
        let vertex_array = require(handles.vertex_array, &self.name, "vertex array")?;
        if self.bound {
            return Err(RenderError::invalid_state(format!(
                "draw_call on '{}' inside an open bind scope",
                self.name
            )));
        }
        let locations = self.locations.ok_or_else(|| {
            RenderError::invalid_state(format!("draw_call on '{}' without a built shader", self.name))
        })?;
        let uploaded = self.index_buffer.upload.ok_or_else(|| {
            RenderError::invalid_state(format!("draw_call on '{}' before allocate_data", self.name))
        })?;
        if let Some(r) = self.ranges.iter().find(|r| r.end() > uploaded.element_count as u64) {
            return Err(RenderError::precondition(format!(
                "draw range {}..{} exceeds the {} uploaded indices of '{}'",
                r.first,
                r.end(),
                uploaded.element_count,
                self.name
            )));
        }

        let index_type = self.index_buffer.element_type;
        let index_size = index_type.size_bytes() as u64;

        dev.bind_program(Some(program))?;
        dev.bind_vertex_array(Some(vertex_array))?;

        let mut pushed = self.color;
        if let Some(slot) = locations.color {
            dev.set_uniform(slot, UniformValue::Vec4(pushed.to_vec4()))?;
        }
        if let Some(slot) = locations.mvp {
            dev.set_uniform(slot, UniformValue::Mat4(self.mvp))?;
        }

        for range in &self.ranges {
            let color = range.color.unwrap_or(self.color);
            if color != pushed {
                if let Some(slot) = locations.color {
                    dev.set_uniform(slot, UniformValue::Vec4(color.to_vec4()))?;
                }
                pushed = color;
            }
            dev.draw_indexed_range(DrawIndexed {
                topology: self.topology,
                index_count: range.count,
                index_type,
                byte_offset: range.first as u64 * index_size,
            })?;
        }

        dev.bind_program(None)?;
        dev.bind_vertex_array(None)?;
        Ok(())
    }

    // ── teardown ──────────────────────────────────────────────────────────

    /// Detaches and deletes every shader stage of the program.
    pub fn destroy_shader(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let handles = self.live_mut("destroy_shader")?;
        let program = handles.program;
        let stages = std::mem::take(&mut handles.stages);
        for stage in stages {
            dev.detach_shader_stage(program, stage)?;
            dev.delete_shader_stage(stage)?;
        }
        Ok(())
    }

    /// Deletes the vertex array and both buffers; descriptors become unallocated.
    pub fn destroy_attributes(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let handles = self.live_mut("destroy_attributes")?;
        let vertex_array = handles.vertex_array.take();
        let vertex_buffer = handles.vertex_buffer.take();
        let index_buffer = handles.index_buffer.take();

        if let Some(v) = vertex_array {
            dev.delete_vertex_array(v)?;
        }
        if let Some(b) = vertex_buffer {
            dev.delete_buffer(b)?;
        }
        if let Some(b) = index_buffer {
            dev.delete_buffer(b)?;
        }
        self.vertex_buffer.upload = None;
        self.index_buffer.upload = None;
        Ok(())
    }

    /// Releases every binding and GPU handle. The object is terminal afterwards.
    pub fn destroy(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let program = self.live("destroy")?.program;

        release_bindings(dev)?;
        self.bound = false;
        self.destroy_shader(dev)?;
        self.destroy_attributes(dev)?;
        dev.delete_program(program)?;

        self.locations = None;
        self.lifecycle = Lifecycle::Destroyed;
        log::debug!("'{}': destroyed", self.name);
        Ok(())
    }
}

fn require<T>(handle: Option<T>, name: &str, what: &str) -> RenderResult<T> {
    handle.ok_or_else(|| RenderError::invalid_state(format!("{what} of '{name}' was already freed")))
}

fn create_attribute_handles(
    dev: &mut dyn GraphicsDevice,
) -> RenderResult<(VertexArrayId, BufferId, BufferId)> {
    let vertex_array = dev.create_vertex_array()?;
    let vertex_buffer = match dev.create_buffer(BufferTarget::Vertex) {
        Ok(b) => b,
        Err(e) => {
            let _ = dev.delete_vertex_array(vertex_array);
            return Err(e);
        }
    };
    let index_buffer = match dev.create_buffer(BufferTarget::Index) {
        Ok(b) => b,
        Err(e) => {
            let _ = dev.delete_buffer(vertex_buffer);
            let _ = dev.delete_vertex_array(vertex_array);
            return Err(e);
        }
    };
    Ok((vertex_array, vertex_buffer, index_buffer))
}

fn compile_and_link(
    dev: &mut dyn GraphicsDevice,
    program: ProgramId,
    source: &ShaderSource,
    created: &mut Vec<StageId>,
    attached: &mut Vec<StageId>,
) -> RenderResult<()> {
    for kind in [ShaderStage::Vertex, ShaderStage::Fragment] {
        let stage = dev.create_shader_stage(kind)?;
        created.push(stage);
        dev.compile_shader_stage(stage, source.code(kind))?;
    }
    for &stage in created.iter() {
        dev.attach_shader_stage(program, stage)?;
        attached.push(stage);
    }
    dev.link_program(program)
}

fn release_bindings(dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
    dev.bind_program(None)?;
    dev.bind_vertex_array(None)?;
    dev.bind_buffer(BufferTarget::Vertex, None)?;
    dev.bind_buffer(BufferTarget::Index, None)?;
    Ok(())
}

fn pack_indices(indices: &[u32], index_type: ElementType) -> RenderResult<Cow<'_, [u8]>> {
    match index_type {
        ElementType::U32 => Ok(Cow::Borrowed(bytemuck::cast_slice(indices))),
        ElementType::U16 => {
            let narrow = indices
                .iter()
                .map(|&i| u16::try_from(i))
                .collect::<Result<Vec<u16>, _>>()
                .map_err(|_| RenderError::precondition("index does not fit a u16 index buffer"))?;
            Ok(Cow::Owned(bytemuck::cast_slice(&narrow).to_vec()))
        }
        ElementType::F32 => Err(RenderError::precondition("f32 is not an index element type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, RecordingDevice};
    use crate::render::OVERRIDE_COLOR;
    use glam::{Vec3, Vec4};
    use glint_shader::split_str;
    use proptest::prelude::*;

    const VERTICES: [f32; 10] = [-0.5, -0.5, 0.5, -0.5, 0.0, 0.0, -0.5, 0.5, 0.5, 0.5];
    const INDICES: [u32; 6] = [0, 1, 2, 2, 3, 4];

    fn source() -> ShaderSource {
        split_str("#shader vertex\nvoid main() {}\n#shader fragment\nvoid main() {}\n")
    }

    fn built(dev: &mut RecordingDevice) -> RenderableObject {
        let mut obj = RenderableObject::new("twotris");
        obj.create_objects(dev).unwrap();
        obj.build_shader_source(dev, &source()).unwrap();
        obj
    }

    fn uploaded(dev: &mut RecordingDevice) -> RenderableObject {
        let mut obj = built(dev);
        obj.bind_all(dev).unwrap();
        obj.set_count(VERTICES.len());
        obj.set_datatype(ElementType::F32, ElementType::U32);
        obj.allocate_data(dev, &VERTICES, &INDICES).unwrap();
        obj.unbind_all(dev).unwrap();
        obj.set_color(Color::new(1.0, 0.0, 0.0, 0.0));
        obj
    }

    fn assert_mat_eq(a: Mat4, b: Mat4) {
        assert!(a.abs_diff_eq(b, 1e-6), "{a:?} != {b:?}");
    }

    #[test]
    fn create_twice_is_rejected_without_leaking() {
        let mut dev = RecordingDevice::new();
        let mut obj = RenderableObject::new("a");
        obj.create_objects(&mut dev).unwrap();
        assert_eq!(dev.live_handles(), 4);

        let err = obj.create_objects(&mut dev).unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));
        assert_eq!(dev.live_handles(), 4);
    }

    #[test]
    fn build_caches_locations_and_binds_program() {
        let mut dev = RecordingDevice::new();
        let obj = built(&mut dev);
        assert_eq!(
            obj.locations(),
            Some(ShaderLocations { position: Some(0), mvp: Some(0), color: Some(1) })
        );
        assert!(dev.bound_program().is_some());
    }

    #[test]
    fn build_from_missing_file_is_io_error() {
        let mut dev = RecordingDevice::new();
        let mut obj = RenderableObject::new("a");
        obj.create_objects(&mut dev).unwrap();
        let err = obj
            .build_shader(&mut dev, std::env::temp_dir().join("glint-engine-missing.glsl"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
        assert!(err.is_build_failure());
        assert_eq!(obj.locations(), None);
    }

    #[test]
    fn build_from_file_uses_both_sections() {
        let path = std::env::temp_dir().join(format!("glint-engine-{}.glsl", std::process::id()));
        std::fs::write(&path, "#shader vertex\nA\n#shader fragment\nB\n").unwrap();

        let mut dev = RecordingDevice::new();
        let mut obj = RenderableObject::new("a");
        obj.create_objects(&mut dev).unwrap();
        obj.build_shader(&mut dev, &path).unwrap();
        std::fs::remove_file(&path).ok();

        let compiled: Vec<&str> = dev
            .calls()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::CompileShaderStage { source, .. } => Some(source.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(compiled, vec!["A\n", "B\n"]);
    }

    #[test]
    fn compile_failure_leaves_object_unusable() {
        let mut dev = RecordingDevice::new().failing_compile(ShaderStage::Fragment, "0:1: syntax error");
        let mut obj = RenderableObject::new("a");
        obj.create_objects(&mut dev).unwrap();

        let err = obj.build_shader_source(&mut dev, &source()).unwrap_err();
        match err {
            RenderError::Compile { stage, log } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(log.contains("syntax error"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Only the four object handles remain; both stages were released.
        assert_eq!(dev.live_handles(), 4);
        assert_eq!(obj.locations(), None);
        assert!(matches!(obj.bind_all(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.draw_call(&mut dev), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn empty_sections_surface_as_compile_error() {
        let mut dev = RecordingDevice::new();
        let mut obj = RenderableObject::new("a");
        obj.create_objects(&mut dev).unwrap();
        let err = obj.build_shader_source(&mut dev, &split_str("no markers\n")).unwrap_err();
        assert!(matches!(err, RenderError::Compile { stage: ShaderStage::Vertex, .. }));
    }

    #[test]
    fn link_failure_detaches_and_deletes_stages() {
        let mut dev = RecordingDevice::new().failing_link("undefined symbol u_mvp");
        let mut obj = RenderableObject::new("a");
        obj.create_objects(&mut dev).unwrap();

        let err = obj.build_shader_source(&mut dev, &source()).unwrap_err();
        assert!(matches!(err, RenderError::Link { ref log } if log.contains("u_mvp")));
        let detached = dev
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::DetachShaderStage { .. }))
            .count();
        assert_eq!(detached, 2);
        assert_eq!(dev.live_handles(), 4);
    }

    #[test]
    fn build_twice_is_rejected() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        assert!(matches!(
            obj.build_shader_source(&mut dev, &source()),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn missing_uniform_is_tolerated() {
        let mut dev = RecordingDevice::new().without_uniform(COLOR_UNIFORM);
        let mut obj = uploaded(&mut dev);
        assert_eq!(obj.locations().unwrap().color, None);

        dev.take_calls();
        obj.draw_call(&mut dev).unwrap();
        assert_eq!(dev.draws().len(), 2);
        assert!(dev.calls().iter().all(|c| !matches!(c, DeviceCall::SetUniform { slot: 1, .. })));
    }

    #[test]
    fn upload_requires_created_handles() {
        let mut dev = RecordingDevice::new();
        let mut obj = RenderableObject::new("a");
        let err = obj.allocate_data(&mut dev, &VERTICES, &INDICES).unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn upload_requires_bind_scope() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        let err = obj.allocate_data(&mut dev, &VERTICES, &INDICES).unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));
    }

    #[test]
    fn upload_sizes_are_element_count_times_width() {
        let mut dev = RecordingDevice::new();
        let obj = uploaded(&mut dev);
        assert_eq!(
            dev.allocations(),
            vec![
                (BufferTarget::Vertex, VERTICES.len() * std::mem::size_of::<f32>()),
                (BufferTarget::Index, INDICES.len() * std::mem::size_of::<u32>()),
            ]
        );
        assert_eq!(obj.vertex_buffer().upload().unwrap().byte_len, 40);
        assert_eq!(obj.index_buffer().upload().unwrap().element_count, 6);
    }

    #[test]
    fn u16_indices_are_narrowed() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        obj.set_datatype(ElementType::F32, ElementType::U16);
        obj.bind_all(&mut dev).unwrap();
        obj.allocate_data(&mut dev, &VERTICES, &INDICES).unwrap();
        obj.unbind_all(&mut dev).unwrap();
        assert_eq!(dev.allocations()[1], (BufferTarget::Index, 12));

        dev.take_calls();
        obj.draw_call(&mut dev).unwrap();
        assert_eq!(dev.draws()[1].byte_offset, 6);
    }

    #[test]
    fn upload_sets_attribute_layout() {
        let mut dev = RecordingDevice::new();
        uploaded(&mut dev);
        let layout = dev.calls().iter().find_map(|c| match c {
            DeviceCall::SetAttributeBuffer { slot, layout, .. } => Some((*slot, *layout)),
            _ => None,
        });
        assert_eq!(
            layout,
            Some((
                0,
                AttributeLayout { element: ElementType::F32, offset: 0, components: 2, stride: 0 }
            ))
        );
    }

    #[test]
    fn upload_rejects_malformed_input() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        obj.bind_all(&mut dev).unwrap();

        let odd = obj.allocate_data(&mut dev, &[0.0, 1.0, 2.0], &[0]);
        assert!(matches!(odd, Err(RenderError::Precondition(_))));

        let out_of_range = obj.allocate_data(&mut dev, &VERTICES, &[0, 1, 5]);
        assert!(matches!(out_of_range, Err(RenderError::Precondition(_))));

        obj.set_datatype(ElementType::F32, ElementType::F32);
        let float_indices = obj.allocate_data(&mut dev, &VERTICES, &INDICES);
        assert!(matches!(float_indices, Err(RenderError::Precondition(_))));

        obj.set_datatype(ElementType::U16, ElementType::U32);
        let non_float = obj.allocate_data(&mut dev, &VERTICES, &INDICES);
        assert!(matches!(non_float, Err(RenderError::Precondition(_))));

        assert!(!obj.is_dirty());
        assert!(dev.allocations().is_empty());
    }

    #[test]
    fn upload_marks_dirty() {
        let mut dev = RecordingDevice::new();
        let mut obj = uploaded(&mut dev);
        assert!(obj.is_dirty());
        obj.mark_clean();
        assert!(!obj.is_dirty());
    }

    #[test]
    fn bind_scope_must_pair() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        assert!(matches!(obj.unbind_all(&mut dev), Err(RenderError::InvalidState(_))));
        obj.bind_all(&mut dev).unwrap();
        assert!(matches!(obj.bind_all(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.draw_call(&mut dev), Err(RenderError::InvalidState(_))));
        obj.unbind_all(&mut dev).unwrap();
        assert!(!obj.is_bound());
    }

    #[test]
    fn bind_and_unbind_follow_the_same_order() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        dev.take_calls();
        obj.bind_all(&mut dev).unwrap();
        obj.unbind_all(&mut dev).unwrap();

        let calls = dev.take_calls();
        assert!(matches!(calls[0], DeviceCall::BindProgram(Some(_))));
        assert!(matches!(calls[1], DeviceCall::BindVertexArray(Some(_))));
        assert!(matches!(calls[2], DeviceCall::BindBuffer { target: BufferTarget::Vertex, buffer: Some(_) }));
        assert!(matches!(calls[3], DeviceCall::BindBuffer { target: BufferTarget::Index, buffer: Some(_) }));
        assert_eq!(calls[4], DeviceCall::BindProgram(None));
        assert_eq!(calls[5], DeviceCall::BindVertexArray(None));
        assert_eq!(calls[6], DeviceCall::BindBuffer { target: BufferTarget::Vertex, buffer: None });
        assert_eq!(calls[7], DeviceCall::BindBuffer { target: BufferTarget::Index, buffer: None });
    }

    #[test]
    fn mvp_tracks_every_factor() {
        let mut obj = RenderableObject::new("a");
        assert_mat_eq(obj.mvp(), obj.projection() * obj.view() * obj.model());

        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        obj.set_view_mat(view);
        assert_mat_eq(obj.mvp(), default_projection() * view);

        let proj = Mat4::perspective_rh(1.0, 1.5, 0.1, 50.0);
        obj.set_proj_mat(proj);
        assert_mat_eq(obj.mvp(), proj * view * Mat4::IDENTITY);

        let model = Mat4::from_translation(Vec3::new(0.25, -1.0, 0.0));
        obj.set_model_mat(model);
        assert_mat_eq(obj.mvp(), proj * (view * model));

        obj.set_view_mat(Mat4::IDENTITY);
        assert_mat_eq(obj.mvp(), (proj * Mat4::IDENTITY) * model);
    }

    #[test]
    fn color_is_clamped() {
        let mut obj = RenderableObject::new("a");
        obj.set_color(Color::new(2.0, -1.0, 0.5, 1.5));
        assert_eq!(obj.color(), Color::new(1.0, 0.0, 0.5, 1.0));
    }

    #[test]
    fn draw_call_issues_two_ranges_with_paired_colors() {
        let mut dev = RecordingDevice::new();
        let mut obj = uploaded(&mut dev);
        dev.take_calls();

        obj.draw_call(&mut dev).unwrap();

        let draws = dev.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].byte_offset, draws[0].index_count), (0, 3));
        assert_eq!((draws[1].byte_offset, draws[1].index_count), (12, 3));
        assert!(draws.iter().all(|d| d.index_type == ElementType::U32));

        let own = UniformValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(dev.uniform_at_draw(0, 1), Some(own));
        assert_eq!(dev.uniform_at_draw(1, 1), Some(UniformValue::Vec4(OVERRIDE_COLOR.to_vec4())));
        assert_eq!(dev.uniform_at_draw(0, 0), Some(UniformValue::Mat4(obj.mvp())));

        // Program and vertex array are released, buffers are not touched.
        let calls = dev.calls();
        assert_eq!(calls[calls.len() - 2], DeviceCall::BindProgram(None));
        assert_eq!(calls[calls.len() - 1], DeviceCall::BindVertexArray(None));
        assert!(!calls.iter().any(|c| matches!(c, DeviceCall::BindBuffer { .. })));
    }

    #[test]
    fn draw_call_pushes_color_then_mvp_first() {
        let mut dev = RecordingDevice::new();
        let mut obj = uploaded(&mut dev);
        dev.take_calls();
        obj.draw_call(&mut dev).unwrap();

        let calls = dev.calls();
        assert!(matches!(calls[0], DeviceCall::BindProgram(Some(_))));
        assert!(matches!(calls[1], DeviceCall::BindVertexArray(Some(_))));
        assert!(matches!(calls[2], DeviceCall::SetUniform { slot: 1, .. }));
        assert!(matches!(calls[3], DeviceCall::SetUniform { slot: 0, .. }));
        assert!(matches!(calls[4], DeviceCall::DrawIndexedRange(_)));
        assert!(matches!(calls[5], DeviceCall::SetUniform { slot: 1, .. }));
        assert!(matches!(calls[6], DeviceCall::DrawIndexedRange(_)));
    }

    #[test]
    fn own_color_restored_on_next_frame() {
        let mut dev = RecordingDevice::new();
        let mut obj = uploaded(&mut dev);
        dev.take_calls();
        obj.draw_call(&mut dev).unwrap();
        obj.draw_call(&mut dev).unwrap();

        let own = UniformValue::Vec4(obj.color().to_vec4());
        assert_eq!(dev.uniform_at_draw(2, 1), Some(own));
        assert_eq!(dev.uniform_at_draw(3, 1), Some(UniformValue::Vec4(OVERRIDE_COLOR.to_vec4())));
    }

    #[test]
    fn custom_ranges_are_validated() {
        let mut dev = RecordingDevice::new();
        let mut obj = uploaded(&mut dev);
        obj.set_draw_ranges(vec![DrawRange::own(0, 6)]);
        dev.take_calls();
        obj.draw_call(&mut dev).unwrap();
        assert_eq!(dev.draws().len(), 1);

        obj.set_draw_ranges(vec![DrawRange::own(4, 3)]);
        assert!(matches!(obj.draw_call(&mut dev), Err(RenderError::Precondition(_))));
    }

    #[test]
    fn draw_before_upload_is_rejected() {
        let mut dev = RecordingDevice::new();
        let mut obj = built(&mut dev);
        assert!(matches!(obj.draw_call(&mut dev), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn destroy_before_create_is_rejected() {
        let mut dev = RecordingDevice::new();
        let mut obj = RenderableObject::new("a");
        assert!(matches!(obj.destroy(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.destroy_shader(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.destroy_attributes(&mut dev), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn destroy_releases_everything_and_is_terminal() {
        let mut dev = RecordingDevice::new();
        let mut obj = uploaded(&mut dev);
        assert_eq!(dev.live_handles(), 6);

        obj.destroy(&mut dev).unwrap();
        assert_eq!(dev.live_handles(), 0);
        assert_eq!(obj.state(), ObjectState::Destroyed);
        assert!(!obj.vertex_buffer().is_allocated());
        assert!(!obj.index_buffer().is_allocated());

        assert!(matches!(obj.destroy(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.create_objects(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.bind_all(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(obj.draw_call(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(matches!(
            obj.allocate_data(&mut dev, &VERTICES, &INDICES),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn destroy_then_fresh_cycle_does_not_leak_or_alias() {
        let mut dev = RecordingDevice::new();
        let mut first = uploaded(&mut dev);
        let old_vbo = first.vertex_buffer().upload().unwrap().handle;
        let old_ibo = first.index_buffer().upload().unwrap().handle;
        first.destroy(&mut dev).unwrap();

        let mut second = uploaded(&mut dev);
        let new_vbo = second.vertex_buffer().upload().unwrap().handle;
        let new_ibo = second.index_buffer().upload().unwrap().handle;

        assert_ne!(old_vbo, new_vbo);
        assert_ne!(old_ibo, new_ibo);
        assert!(!dev.is_live_buffer(old_vbo));
        assert!(!dev.is_live_buffer(old_ibo));
        assert_eq!(dev.live_handles(), 6);

        dev.take_calls();
        second.draw_call(&mut dev).unwrap();
        assert_eq!(dev.draws().len(), 2);

        second.destroy(&mut dev).unwrap();
        assert_eq!(dev.live_handles(), 0);
    }

    #[derive(Debug, Clone, Copy)]
    enum Factor {
        Model,
        View,
        Projection,
    }

    fn transform() -> impl Strategy<Value = Mat4> {
        (
            prop::array::uniform3(-10.0f32..10.0),
            -std::f32::consts::PI..std::f32::consts::PI,
            prop::array::uniform3(0.1f32..4.0),
        )
            .prop_map(|(t, angle, s)| {
                Mat4::from_translation(Vec3::from_array(t))
                    * Mat4::from_rotation_z(angle)
                    * Mat4::from_scale(Vec3::from_array(s))
            })
    }

    fn factor() -> impl Strategy<Value = Factor> {
        prop_oneof![Just(Factor::Model), Just(Factor::View), Just(Factor::Projection)]
    }

    proptest! {
        #[test]
        fn mvp_holds_after_any_setter_sequence(
            steps in prop::collection::vec((factor(), transform()), 1..12)
        ) {
            let mut obj = RenderableObject::new("a");
            for (which, m) in steps {
                match which {
                    Factor::Model => obj.set_model_mat(m),
                    Factor::View => obj.set_view_mat(m),
                    Factor::Projection => obj.set_proj_mat(m),
                }
                let expected = obj.projection() * obj.view() * obj.model();
                prop_assert!(obj.mvp().abs_diff_eq(expected, 1e-4), "{:?} != {:?}", obj.mvp(), expected);
            }
        }

        #[test]
        fn uploaded_bytes_are_count_times_width(
            (vertex_count, indices) in (1usize..64).prop_flat_map(|n| {
                (Just(n), prop::collection::vec(0..n as u32, 0..64))
            }),
            wide in any::<bool>(),
        ) {
            let index_type = if wide { ElementType::U32 } else { ElementType::U16 };
            let vertices = vec![0.25f32; vertex_count * 2];

            let mut dev = RecordingDevice::new();
            let mut obj = built(&mut dev);
            obj.set_datatype(ElementType::F32, index_type);
            obj.bind_all(&mut dev).unwrap();
            obj.allocate_data(&mut dev, &vertices, &indices).unwrap();
            obj.unbind_all(&mut dev).unwrap();

            prop_assert_eq!(
                dev.allocations(),
                vec![
                    (BufferTarget::Vertex, vertices.len() * ElementType::F32.size_bytes()),
                    (BufferTarget::Index, indices.len() * index_type.size_bytes()),
                ]
            );
            prop_assert_eq!(obj.index_buffer().upload().unwrap().element_count, indices.len());
        }
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(RenderableObject::new("a").id(), RenderableObject::new("a").id());
    }
}
