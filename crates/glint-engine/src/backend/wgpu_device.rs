use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;

use glint_shader::ShaderStage;
use wgpu::util::DeviceExt;

use crate::device::{
    AttributeLayout, BufferId, BufferTarget, ClearMask, DrawIndexed, ElementType, GraphicsDevice,
    ProgramId, RenderError, RenderResult, StageId, Topology, UniformValue, UsagePattern,
    VertexArrayId,
};
use crate::paint::Color;

use super::gpu::{DEPTH_FORMAT, FrameTarget, Gpu};
use super::reflect::{
    self, CompiledStage, InputKind, ProgramInterface, UNIFORM_SLOT_BYTES, UniformBinding,
};

// ── resource slots ────────────────────────────────────────────────────────

struct StageSlot {
    kind: ShaderStage,
    compiled: Option<CompiledStage>,
}

struct LinkedProgram {
    interface: ProgramInterface,
    vertex_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_module: wgpu::ShaderModule,
    fragment_entry: String,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    /// Last value pushed per binding.
    values: HashMap<u32, UniformValue>,
}

#[derive(Default)]
struct ProgramSlot {
    stages: Vec<StageId>,
    linked: Option<LinkedProgram>,
}

#[derive(Copy, Clone)]
struct AttributeBinding {
    layout: AttributeLayout,
    buffer: BufferId,
}

#[derive(Default)]
struct VertexArraySlot {
    enabled: Vec<u32>,
    attributes: HashMap<u32, AttributeBinding>,
    index_buffer: Option<BufferId>,
}

struct BufferSlot {
    target: BufferTarget,
    gpu: Option<wgpu::Buffer>,
    len: u64,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    topology: Topology,
    /// Only set for strip topologies.
    strip_index: Option<wgpu::IndexFormat>,
    /// `(shader location, format, stride)` sorted by location.
    attributes: Vec<(u32, wgpu::VertexFormat, u64)>,
}

// ── frame recording ───────────────────────────────────────────────────────

struct RecordedDraw {
    program: ProgramId,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    uniforms: Vec<UniformBinding>,
    /// Start of this draw's uniform block in the frame's uniform bytes.
    uniform_offset: u32,
    vertex_buffers: Vec<(wgpu::Buffer, u64)>,
    index_buffer: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
    indices: Range<u32>,
}

struct FrameRecording {
    clear: ClearMask,
    draws: Vec<RecordedDraw>,
    uniform_bytes: Vec<u8>,
}

impl FrameRecording {
    fn new() -> Self {
        Self {
            clear: ClearMask::empty(),
            draws: Vec::new(),
            uniform_bytes: Vec::new(),
        }
    }
}

// ── device ────────────────────────────────────────────────────────────────

/// [`GraphicsDevice`] backed by wgpu.
///
/// Calls are validated and recorded immediately; [`encode_frame`](Self::encode_frame)
/// replays the recorded frame into a single render pass. Per draw, the
/// current uniform values are snapshotted into a 256-byte-slot block that is
/// bound with a dynamic offset. Pipelines are created on first use for each
/// (program, topology, vertex layout) and cached.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    sample_count: u32,

    next_id: u32,
    stages: HashMap<StageId, StageSlot>,
    programs: HashMap<ProgramId, ProgramSlot>,
    vertex_arrays: HashMap<VertexArrayId, VertexArraySlot>,
    buffers: HashMap<BufferId, BufferSlot>,

    bound_program: Option<ProgramId>,
    bound_vertex_array: Option<VertexArrayId>,
    bound_vertex_buffer: Option<BufferId>,
    loose_index_buffer: Option<BufferId>,

    clear_color: Color,
    /// Lower-left origin, like the rest of the interface.
    viewport: Option<(i32, i32, u32, u32)>,

    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    frame: FrameRecording,
}

impl WgpuDevice {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        color_format: wgpu::TextureFormat,
        sample_count: u32,
    ) -> Self {
        Self {
            device,
            queue,
            color_format,
            sample_count,
            next_id: 1,
            stages: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            buffers: HashMap::new(),
            bound_program: None,
            bound_vertex_array: None,
            bound_vertex_buffer: None,
            loose_index_buffer: None,
            clear_color: Color::transparent(),
            viewport: None,
            pipelines: HashMap::new(),
            frame: FrameRecording::new(),
        }
    }

    /// Device matching `gpu`'s surface format and sample count.
    pub fn for_gpu(gpu: &Gpu<'_>) -> Self {
        Self::new(
            gpu.device().clone(),
            gpu.queue().clone(),
            gpu.surface_format(),
            gpu.sample_count(),
        )
    }

    /// Draws recorded since the last [`encode_frame`](Self::encode_frame).
    pub fn pending_draws(&self) -> usize {
        self.frame.draws.len()
    }

    fn next_raw(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn bound_index_buffer(&self) -> Option<BufferId> {
        match self.bound_vertex_array {
            Some(vao) => self.vertex_arrays.get(&vao).and_then(|v| v.index_buffer),
            None => self.loose_index_buffer,
        }
    }

    fn linked(&self, program: ProgramId) -> RenderResult<&LinkedProgram> {
        self.programs
            .get(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?
            .linked
            .as_ref()
            .ok_or_else(|| RenderError::invalid_state(format!("program {program:?} is not linked")))
    }

    fn allocated(&self, buffer: BufferId) -> RenderResult<(&wgpu::Buffer, u64)> {
        let slot = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown buffer {buffer:?}")))?;
        let gpu = slot
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::invalid_state(format!("buffer {buffer:?} has no data")))?;
        Ok((gpu, slot.len))
    }

    /// Replays the recorded frame into one render pass on `encoder` and
    /// starts a new recording.
    pub fn encode_frame(&mut self, encoder: &mut wgpu::CommandEncoder, target: &FrameTarget<'_>) {
        let frame = std::mem::replace(&mut self.frame, FrameRecording::new());

        let uniform_buffer = (!frame.uniform_bytes.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("glint frame uniforms"),
                contents: &frame.uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut bind_groups: HashMap<ProgramId, wgpu::BindGroup> = HashMap::new();
        if let Some(buffer) = &uniform_buffer {
            for draw in &frame.draws {
                let Some(layout) = &draw.bind_group_layout else { continue };
                bind_groups.entry(draw.program).or_insert_with(|| {
                    let entries: Vec<wgpu::BindGroupEntry<'_>> = draw
                        .uniforms
                        .iter()
                        .map(|u| wgpu::BindGroupEntry {
                            binding: u.binding,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer,
                                offset: u.binding as u64 * UNIFORM_SLOT_BYTES,
                                size: NonZeroU64::new(u.size),
                            }),
                        })
                        .collect();
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("glint program uniforms"),
                        layout,
                        entries: &entries,
                    })
                });
            }
        }

        let color_load = if frame.clear.contains(ClearMask::COLOR) {
            wgpu::LoadOp::Clear(self.clear_color.to_wgpu())
        } else {
            wgpu::LoadOp::Load
        };
        let depth_load = if frame.clear.contains(ClearMask::DEPTH) {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glint frame pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color,
                resolve_target: target.resolve,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target.depth,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        if let Some((x, y, w, h)) = self
            .viewport
            .and_then(|vp| pass_viewport(vp, target.width, target.height))
        {
            pass.set_viewport(x, y, w, h, 0.0, 1.0);
        }

        for draw in &frame.draws {
            pass.set_pipeline(&draw.pipeline);
            if let Some(group) = bind_groups.get(&draw.program) {
                let offsets = vec![draw.uniform_offset; draw.uniforms.len()];
                pass.set_bind_group(0, group, &offsets);
            }
            for (i, (buffer, offset)) in draw.vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(i as u32, buffer.slice(*offset..));
            }
            pass.set_index_buffer(draw.index_buffer.slice(..), draw.index_format);
            pass.draw_indexed(draw.indices.clone(), 0, 0..1);
        }
    }
}

impl GraphicsDevice for WgpuDevice {
    fn create_shader_stage(&mut self, kind: ShaderStage) -> RenderResult<StageId> {
        let stage = StageId::from_raw(self.next_raw());
        self.stages.insert(stage, StageSlot { kind, compiled: None });
        Ok(stage)
    }

    fn compile_shader_stage(&mut self, stage: StageId, source: &str) -> RenderResult<()> {
        let slot = self
            .stages
            .get_mut(&stage)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown shader stage {stage:?}")))?;
        slot.compiled = None;
        slot.compiled = Some(reflect::compile(slot.kind, source)?);
        Ok(())
    }

    fn delete_shader_stage(&mut self, stage: StageId) -> RenderResult<()> {
        self.stages
            .remove(&stage)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown shader stage {stage:?}")))?;
        for program in self.programs.values_mut() {
            program.stages.retain(|s| *s != stage);
        }
        Ok(())
    }

    fn create_program(&mut self) -> RenderResult<ProgramId> {
        let program = ProgramId::from_raw(self.next_raw());
        self.programs.insert(program, ProgramSlot::default());
        Ok(program)
    }

    fn attach_shader_stage(&mut self, program: ProgramId, stage: StageId) -> RenderResult<()> {
        if !self.stages.contains_key(&stage) {
            return Err(RenderError::invalid_state(format!("unknown shader stage {stage:?}")));
        }
        let slot = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;
        if !slot.stages.contains(&stage) {
            slot.stages.push(stage);
        }
        Ok(())
    }

    fn detach_shader_stage(&mut self, program: ProgramId, stage: StageId) -> RenderResult<()> {
        let slot = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;
        if !slot.stages.contains(&stage) {
            return Err(RenderError::invalid_state(format!(
                "stage {stage:?} is not attached to {program:?}"
            )));
        }
        slot.stages.retain(|s| *s != stage);
        Ok(())
    }

    fn link_program(&mut self, program: ProgramId) -> RenderResult<()> {
        let slot = self
            .programs
            .get(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;

        let compiled = |kind: ShaderStage| {
            slot.stages
                .iter()
                .filter_map(|s| self.stages.get(s))
                .filter(|s| s.kind == kind)
                .find_map(|s| s.compiled.as_ref())
                .ok_or_else(|| RenderError::Link { log: format!("no compiled {kind} stage attached") })
        };
        let vertex = compiled(ShaderStage::Vertex)?;
        let fragment = compiled(ShaderStage::Fragment)?;
        let interface = reflect::link(vertex, fragment)?;

        let max_dynamic = self.device.limits().max_dynamic_uniform_buffers_per_pipeline_layout;
        if interface.uniforms.len() > max_dynamic as usize {
            return Err(RenderError::Link {
                log: format!(
                    "{} uniforms exceed the device limit of {max_dynamic}",
                    interface.uniforms.len()
                ),
            });
        }

        let module = |label: &str, source: &str| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
            })
        };
        let vertex_module = module("glint vertex stage", &vertex.source);
        let fragment_module = module("glint fragment stage", &fragment.source);

        let bind_group_layout = (!interface.uniforms.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = interface
                .uniforms
                .iter()
                .map(|u| wgpu::BindGroupLayoutEntry {
                    binding: u.binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(u.size),
                    },
                    count: None,
                })
                .collect();
            self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("glint program bgl"),
                entries: &entries,
            })
        });
        let layouts: Vec<&wgpu::BindGroupLayout> = bind_group_layout.iter().collect();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glint program layout"),
            bind_group_layouts: &layouts,
            immediate_size: 0,
        });

        let linked = LinkedProgram {
            vertex_entry: vertex.entry_point.clone(),
            fragment_entry: fragment.entry_point.clone(),
            interface,
            vertex_module,
            fragment_module,
            bind_group_layout,
            pipeline_layout,
            values: HashMap::new(),
        };

        self.pipelines.retain(|key, _| key.program != program);
        if let Some(slot) = self.programs.get_mut(&program) {
            slot.linked = Some(linked);
        }
        log::debug!("linked program {program:?}");
        Ok(())
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.linked(program).ok()?.interface.attributes.get(name).copied()
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.linked(program)
            .ok()?
            .interface
            .uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.binding)
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        self.programs
            .remove(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
        self.pipelines.retain(|key, _| key.program != program);
        Ok(())
    }

    fn create_vertex_array(&mut self) -> RenderResult<VertexArrayId> {
        let vao = VertexArrayId::from_raw(self.next_raw());
        self.vertex_arrays.insert(vao, VertexArraySlot::default());
        Ok(vao)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> RenderResult<()> {
        self.vertex_arrays.remove(&vertex_array).ok_or_else(|| {
            RenderError::invalid_state(format!("unknown vertex array {vertex_array:?}"))
        })?;
        if self.bound_vertex_array == Some(vertex_array) {
            self.bound_vertex_array = None;
        }
        Ok(())
    }

    fn create_buffer(&mut self, target: BufferTarget) -> RenderResult<BufferId> {
        let buffer = BufferId::from_raw(self.next_raw());
        self.buffers.insert(buffer, BufferSlot { target, gpu: None, len: 0 });
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferId) -> RenderResult<()> {
        self.buffers
            .remove(&buffer)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown buffer {buffer:?}")))?;
        if self.bound_vertex_buffer == Some(buffer) {
            self.bound_vertex_buffer = None;
        }
        if self.loose_index_buffer == Some(buffer) {
            self.loose_index_buffer = None;
        }
        for vao in self.vertex_arrays.values_mut() {
            if vao.index_buffer == Some(buffer) {
                vao.index_buffer = None;
            }
            vao.attributes.retain(|_, a| a.buffer != buffer);
        }
        Ok(())
    }

    fn bind_program(&mut self, program: Option<ProgramId>) -> RenderResult<()> {
        if let Some(p) = program {
            self.linked(p)?;
        }
        self.bound_program = program;
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) -> RenderResult<()> {
        if let Some(v) = vertex_array {
            if !self.vertex_arrays.contains_key(&v) {
                return Err(RenderError::invalid_state(format!("unknown vertex array {v:?}")));
            }
        }
        self.bound_vertex_array = vertex_array;
        Ok(())
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) -> RenderResult<()> {
        if let Some(b) = buffer {
            let slot = self
                .buffers
                .get(&b)
                .ok_or_else(|| RenderError::invalid_state(format!("unknown buffer {b:?}")))?;
            if slot.target != target {
                return Err(RenderError::invalid_state(format!(
                    "buffer {b:?} was created for {:?}, not {target:?}",
                    slot.target
                )));
            }
        }
        match target {
            BufferTarget::Vertex => self.bound_vertex_buffer = buffer,
            BufferTarget::Index => match self.bound_vertex_array {
                Some(vao) => {
                    if let Some(slot) = self.vertex_arrays.get_mut(&vao) {
                        slot.index_buffer = buffer;
                    }
                }
                None => self.loose_index_buffer = buffer,
            },
        }
        Ok(())
    }

    fn allocate_buffer(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: UsagePattern,
    ) -> RenderResult<()> {
        let bound = match target {
            BufferTarget::Vertex => self.bound_vertex_buffer,
            BufferTarget::Index => self.bound_index_buffer(),
        };
        let buffer = bound.ok_or_else(|| {
            RenderError::invalid_state(format!("no {target:?} buffer bound for upload"))
        })?;
        let slot = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown buffer {buffer:?}")))?;

        // Copies must be 4-byte aligned and buffers non-empty.
        let padded_len = (data.len().max(1) + 3) & !3;
        let mut contents = Cow::Borrowed(data);
        if contents.len() != padded_len {
            contents.to_mut().resize(padded_len, 0);
        }

        match &slot.gpu {
            Some(existing) if usage != UsagePattern::Static && existing.size() >= padded_len as u64 => {
                self.queue.write_buffer(existing, 0, &contents);
            }
            _ => {
                let role = match target {
                    BufferTarget::Vertex => wgpu::BufferUsages::VERTEX,
                    BufferTarget::Index => wgpu::BufferUsages::INDEX,
                };
                slot.gpu = Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("glint geometry buffer"),
                    contents: &contents,
                    usage: role | wgpu::BufferUsages::COPY_DST,
                }));
            }
        }
        slot.len = data.len() as u64;
        Ok(())
    }

    fn enable_attribute(&mut self, slot: u32) -> RenderResult<()> {
        let vao = self
            .bound_vertex_array
            .ok_or_else(|| RenderError::invalid_state("no vertex array bound"))?;
        if let Some(state) = self.vertex_arrays.get_mut(&vao) {
            if !state.enabled.contains(&slot) {
                state.enabled.push(slot);
            }
        }
        Ok(())
    }

    fn set_attribute_buffer(&mut self, slot: u32, layout: AttributeLayout) -> RenderResult<()> {
        let vao = self
            .bound_vertex_array
            .ok_or_else(|| RenderError::invalid_state("no vertex array bound"))?;
        let buffer = self
            .bound_vertex_buffer
            .ok_or_else(|| RenderError::invalid_state("no vertex buffer bound"))?;
        vertex_format(&layout)?;
        if let Some(state) = self.vertex_arrays.get_mut(&vao) {
            state.attributes.insert(slot, AttributeBinding { layout, buffer });
        }
        Ok(())
    }

    fn set_uniform(&mut self, slot: u32, value: UniformValue) -> RenderResult<()> {
        let program = self
            .bound_program
            .ok_or_else(|| RenderError::invalid_state("no program bound for uniform upload"))?;
        let linked = self
            .programs
            .get_mut(&program)
            .and_then(|p| p.linked.as_mut())
            .ok_or_else(|| RenderError::invalid_state(format!("program {program:?} is not linked")))?;
        let binding = linked
            .interface
            .uniform(slot)
            .ok_or_else(|| RenderError::precondition(format!("program has no uniform at slot {slot}")))?;
        if binding.size != value.size_bytes() as u64 {
            return Err(RenderError::precondition(format!(
                "uniform '{}' is {} bytes, value is {}",
                binding.name,
                binding.size,
                value.size_bytes()
            )));
        }
        linked.values.insert(slot, value);
        Ok(())
    }

    fn draw_indexed_range(&mut self, draw: DrawIndexed) -> RenderResult<()> {
        let program = self
            .bound_program
            .ok_or_else(|| RenderError::invalid_state("draw without a bound program"))?;
        let vao_id = self
            .bound_vertex_array
            .ok_or_else(|| RenderError::invalid_state("draw without a bound vertex array"))?;
        let index_format = index_format(draw.index_type)?;
        let index_size = draw.index_type.size_bytes() as u64;
        if draw.byte_offset % index_size != 0 {
            return Err(RenderError::precondition(format!(
                "index byte offset {} is not aligned to {index_size}",
                draw.byte_offset
            )));
        }

        let index_id = self
            .bound_index_buffer()
            .ok_or_else(|| RenderError::invalid_state("draw without an index buffer"))?;
        let (index_buffer, index_len) = self.allocated(index_id)?;
        let end = draw.byte_offset + draw.index_count as u64 * index_size;
        if end > index_len {
            return Err(RenderError::precondition(format!(
                "draw reads index bytes {}..{end} of a {index_len}-byte buffer",
                draw.byte_offset
            )));
        }
        let index_buffer = index_buffer.clone();

        let linked = self.linked(program)?;
        let vao = self
            .vertex_arrays
            .get(&vao_id)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown vertex array {vao_id:?}")))?;

        let mut locations: Vec<(&String, u32)> =
            linked.interface.attributes.iter().map(|(n, l)| (n, *l)).collect();
        locations.sort_by_key(|(_, l)| *l);

        let mut key_attributes = Vec::with_capacity(locations.len());
        let mut vertex_buffers = Vec::with_capacity(locations.len());
        for (name, location) in locations {
            let binding = vao
                .attributes
                .get(&location)
                .filter(|_| vao.enabled.contains(&location))
                .ok_or_else(|| {
                    RenderError::invalid_state(format!(
                        "vertex input '{name}' @location({location}) has no enabled attribute"
                    ))
                })?;
            if let Some(&declared) = linked.interface.input_kinds.get(&location) {
                check_input_kind(name, location, declared, &binding.layout)?;
            }
            let (buffer, _) = self.allocated(binding.buffer)?;
            key_attributes.push((
                location,
                vertex_format(&binding.layout)?,
                binding.layout.effective_stride(),
            ));
            vertex_buffers.push((buffer.clone(), binding.layout.offset));
        }

        let key = PipelineKey {
            program,
            topology: draw.topology,
            strip_index: draw.topology.is_strip().then_some(index_format),
            attributes: key_attributes,
        };

        let block_size = linked.interface.block_size() as usize;
        let uniform_offset = self.frame.uniform_bytes.len();
        let mut block = vec![0u8; block_size];
        for u in &linked.interface.uniforms {
            if let Some(value) = linked.values.get(&u.binding) {
                let start = u.binding as usize * UNIFORM_SLOT_BYTES as usize;
                block[start..start + value.size_bytes()].copy_from_slice(value.as_bytes());
            }
        }
        let uniforms = linked.interface.uniforms.clone();
        let bind_group_layout = linked.bind_group_layout.clone();

        let pipeline = match self.pipelines.get(&key) {
            Some(p) => p.clone(),
            None => {
                let p = create_pipeline(&self.device, linked, &key, self.color_format, self.sample_count);
                self.pipelines.insert(key, p.clone());
                p
            }
        };

        let first = (draw.byte_offset / index_size) as u32;
        self.frame.uniform_bytes.extend_from_slice(&block);
        self.frame.draws.push(RecordedDraw {
            program,
            pipeline,
            bind_group_layout,
            uniforms,
            uniform_offset: uniform_offset as u32,
            vertex_buffers,
            index_buffer,
            index_format,
            indices: first..first + draw.index_count,
        });
        Ok(())
    }

    fn clear(&mut self, mask: ClearMask) -> RenderResult<()> {
        self.frame.clear |= mask;
        Ok(())
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> RenderResult<()> {
        self.viewport = Some((x, y, width, height));
        Ok(())
    }

    fn set_clear_color(&mut self, color: Color) -> RenderResult<()> {
        if !color.is_finite() {
            return Err(RenderError::precondition(format!("clear color {color:?} is not finite")));
        }
        self.clear_color = color;
        Ok(())
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    program: &LinkedProgram,
    key: &PipelineKey,
    color_format: wgpu::TextureFormat,
    sample_count: u32,
) -> wgpu::RenderPipeline {
    let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
        .attributes
        .iter()
        .map(|&(location, format, _)| {
            [wgpu::VertexAttribute {
                format,
                offset: 0,
                shader_location: location,
            }]
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
        .attributes
        .iter()
        .zip(&attributes)
        .map(|(&(_, _, stride), attrs)| wgpu::VertexBufferLayout {
            array_stride: stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: attrs,
        })
        .collect();

    log::debug!("creating pipeline for {:?} ({:?})", key.program, key.topology);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("glint object pipeline"),
        layout: Some(&program.pipeline_layout),

        vertex: wgpu::VertexState {
            module: &program.vertex_module,
            entry_point: Some(program.vertex_entry.as_str()),
            compilation_options: Default::default(),
            buffers: &buffers,
        },

        fragment: Some(wgpu::FragmentState {
            module: &program.fragment_module,
            entry_point: Some(program.fragment_entry.as_str()),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),

        primitive: wgpu::PrimitiveState {
            topology: primitive_topology(key.topology),
            strip_index_format: key.strip_index,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },

        // Depth is cleared each frame but never tested or written.
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: sample_count,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },

        multiview_mask: None,
        cache: None,
    })
}

fn primitive_topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::Points => wgpu::PrimitiveTopology::PointList,
        Topology::Lines => wgpu::PrimitiveTopology::LineList,
        Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn index_format(element: ElementType) -> RenderResult<wgpu::IndexFormat> {
    match element {
        ElementType::U16 => Ok(wgpu::IndexFormat::Uint16),
        ElementType::U32 => Ok(wgpu::IndexFormat::Uint32),
        ElementType::F32 => Err(RenderError::precondition("F32 is not an index type")),
    }
}

fn vertex_format(layout: &AttributeLayout) -> RenderResult<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    let format = match (layout.element, layout.components) {
        (ElementType::F32, 1) => F::Float32,
        (ElementType::F32, 2) => F::Float32x2,
        (ElementType::F32, 3) => F::Float32x3,
        (ElementType::F32, 4) => F::Float32x4,
        (ElementType::U32, 1) => F::Uint32,
        (ElementType::U32, 2) => F::Uint32x2,
        (ElementType::U32, 3) => F::Uint32x3,
        (ElementType::U32, 4) => F::Uint32x4,
        (ElementType::U16, 2) => F::Uint16x2,
        (ElementType::U16, 4) => F::Uint16x4,
        (element, components) => {
            return Err(RenderError::precondition(format!(
                "no vertex format for {components} x {element:?}"
            )));
        }
    };
    Ok(format)
}

/// Rejects an attribute whose data the shader would read as another numeric
/// class; wgpu treats that as a pipeline validation error.
fn check_input_kind(
    name: &str,
    location: u32,
    declared: InputKind,
    layout: &AttributeLayout,
) -> RenderResult<()> {
    let provided = InputKind::of_element(layout.element);
    if provided != declared {
        return Err(RenderError::precondition(format!(
            "vertex input '{name}' @location({location}) is {declared:?}, attribute data is {:?}",
            layout.element
        )));
    }
    Ok(())
}

/// Converts a lower-left-origin viewport to the pass's top-left origin,
/// clipped to the target. `None` when nothing of it is visible.
fn pass_viewport(
    (x, y, width, height): (i32, i32, u32, u32),
    target_width: u32,
    target_height: u32,
) -> Option<(f32, f32, f32, f32)> {
    let (tw, th) = (target_width as i64, target_height as i64);
    let left = (x as i64).clamp(0, tw);
    let right = (x as i64 + width as i64).clamp(0, tw);
    let bottom = (y as i64).clamp(0, th);
    let top = (y as i64 + height as i64).clamp(0, th);
    if right <= left || top <= bottom {
        return None;
    }
    Some((
        left as f32,
        (th - top) as f32,
        (right - left) as f32,
        (top - bottom) as f32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_viewport_maps_unchanged() {
        assert_eq!(pass_viewport((0, 0, 800, 600), 800, 600), Some((0.0, 0.0, 800.0, 600.0)));
    }

    #[test]
    fn viewport_origin_flips_to_top_left() {
        assert_eq!(pass_viewport((10, 20, 100, 50), 800, 600), Some((10.0, 530.0, 100.0, 50.0)));
    }

    #[test]
    fn viewport_is_clipped_to_target() {
        assert_eq!(pass_viewport((-10, 0, 1000, 1000), 800, 600), Some((0.0, 0.0, 800.0, 600.0)));
        assert_eq!(pass_viewport((900, 0, 100, 100), 800, 600), None);
        assert_eq!(pass_viewport((0, 0, 0, 600), 800, 600), None);
    }

    #[test]
    fn vertex_formats() {
        let layout = AttributeLayout { element: ElementType::F32, offset: 0, components: 2, stride: 0 };
        assert_eq!(vertex_format(&layout).unwrap(), wgpu::VertexFormat::Float32x2);
        let odd = AttributeLayout { element: ElementType::U16, components: 3, ..layout };
        assert!(matches!(vertex_format(&odd), Err(RenderError::Precondition(_))));
    }

    #[test]
    fn attribute_kind_must_match_the_shader_input() {
        let floats = AttributeLayout { element: ElementType::F32, offset: 0, components: 2, stride: 0 };
        assert!(check_input_kind("position", 0, InputKind::Float, &floats).is_ok());
        assert!(matches!(
            check_input_kind("position", 0, InputKind::Uint, &floats),
            Err(RenderError::Precondition(_))
        ));

        let uints = AttributeLayout { element: ElementType::U32, ..floats };
        assert!(check_input_kind("id", 1, InputKind::Uint, &uints).is_ok());
        assert!(check_input_kind("id", 1, InputKind::Sint, &uints).is_err());
    }

    #[test]
    fn index_formats() {
        assert_eq!(index_format(ElementType::U16).unwrap(), wgpu::IndexFormat::Uint16);
        assert_eq!(index_format(ElementType::U32).unwrap(), wgpu::IndexFormat::Uint32);
        assert!(index_format(ElementType::F32).is_err());
    }
}
