use std::collections::HashMap;

use glint_shader::ShaderStage;

use crate::paint::Color;

use super::types::{
    AttributeLayout, BufferId, BufferTarget, ClearMask, DrawIndexed, ProgramId, StageId,
    UniformValue, UsagePattern, VertexArrayId,
};
use super::{GraphicsDevice, RenderError, RenderResult};

/// One call received by a [`RecordingDevice`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateShaderStage { stage: StageId, kind: ShaderStage },
    CompileShaderStage { stage: StageId, source: String },
    DeleteShaderStage(StageId),
    CreateProgram(ProgramId),
    AttachShaderStage { program: ProgramId, stage: StageId },
    DetachShaderStage { program: ProgramId, stage: StageId },
    LinkProgram(ProgramId),
    DeleteProgram(ProgramId),
    CreateVertexArray(VertexArrayId),
    DeleteVertexArray(VertexArrayId),
    CreateBuffer { buffer: BufferId, target: BufferTarget },
    DeleteBuffer(BufferId),
    BindProgram(Option<ProgramId>),
    BindVertexArray(Option<VertexArrayId>),
    BindBuffer { target: BufferTarget, buffer: Option<BufferId> },
    AllocateBuffer { target: BufferTarget, buffer: BufferId, bytes: usize, usage: UsagePattern },
    EnableAttribute(u32),
    SetAttributeBuffer { slot: u32, buffer: BufferId, layout: AttributeLayout },
    SetUniform { program: ProgramId, slot: u32, value: UniformValue },
    DrawIndexedRange(DrawIndexed),
    Clear(ClearMask),
    SetViewport { x: i32, y: i32, width: u32, height: u32 },
    SetClearColor(Color),
}

#[derive(Debug)]
struct StageState {
    kind: ShaderStage,
    compiled: bool,
}

#[derive(Debug, Default)]
struct ProgramState {
    stages: Vec<StageId>,
    linked: bool,
}

#[derive(Debug, Default)]
struct VertexArrayState {
    index_buffer: Option<BufferId>,
    enabled: Vec<u32>,
}

#[derive(Debug)]
struct BufferState {
    target: BufferTarget,
    len: usize,
}

/// In-memory [`GraphicsDevice`].
///
/// Tracks handle liveness and bindings the way a real driver would, rejects
/// calls that break the binding discipline with [`RenderError::InvalidState`],
/// and records every accepted call for inspection.
///
/// Linked programs expose the attribute/uniform tables configured on the
/// device (`position` → 0, `u_mvp` → 0, `u_color` → 1 by default).
#[derive(Debug)]
pub struct RecordingDevice {
    calls: Vec<DeviceCall>,
    next_id: u32,

    stages: HashMap<StageId, StageState>,
    programs: HashMap<ProgramId, ProgramState>,
    vertex_arrays: HashMap<VertexArrayId, VertexArrayState>,
    buffers: HashMap<BufferId, BufferState>,

    bound_program: Option<ProgramId>,
    bound_vertex_array: Option<VertexArrayId>,
    bound_vertex_buffer: Option<BufferId>,
    /// Index buffer binding while no vertex array is bound.
    loose_index_buffer: Option<BufferId>,

    attributes: HashMap<String, u32>,
    uniforms: HashMap<String, u32>,
    compile_failure: Option<(ShaderStage, String)>,
    link_failure: Option<String>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            next_id: 1,
            stages: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            buffers: HashMap::new(),
            bound_program: None,
            bound_vertex_array: None,
            bound_vertex_buffer: None,
            loose_index_buffer: None,
            attributes: HashMap::from([("position".to_string(), 0)]),
            uniforms: HashMap::from([("u_mvp".to_string(), 0), ("u_color".to_string(), 1)]),
            compile_failure: None,
            link_failure: None,
        }
    }

    // ── configuration ─────────────────────────────────────────────────────

    /// Linked programs will not expose uniform `name`.
    pub fn without_uniform(mut self, name: &str) -> Self {
        self.uniforms.remove(name);
        self
    }

    /// Linked programs will not expose attribute `name`.
    pub fn without_attribute(mut self, name: &str) -> Self {
        self.attributes.remove(name);
        self
    }

    /// Every compile of a `stage` stage fails with `log`.
    pub fn failing_compile(mut self, stage: ShaderStage, log: &str) -> Self {
        self.compile_failure = Some((stage, log.to_string()));
        self
    }

    /// Every link fails with `log`.
    pub fn failing_link(mut self, log: &str) -> Self {
        self.link_failure = Some(log.to_string());
        self
    }

    // ── inspection ────────────────────────────────────────────────────────

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Drains the recorded calls, keeping device state.
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of shader stages, programs, vertex arrays and buffers not yet deleted.
    pub fn live_handles(&self) -> usize {
        self.stages.len() + self.programs.len() + self.vertex_arrays.len() + self.buffers.len()
    }

    pub fn is_live_buffer(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer)
    }

    pub fn bound_program(&self) -> Option<ProgramId> {
        self.bound_program
    }

    /// Recorded draws in order.
    pub fn draws(&self) -> Vec<DrawIndexed> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::DrawIndexedRange(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Value most recently pushed to `slot` before the `draw_index`-th draw.
    pub fn uniform_at_draw(&self, draw_index: usize, slot: u32) -> Option<UniformValue> {
        let mut draws_seen = 0;
        let mut last = None;
        for call in &self.calls {
            match call {
                DeviceCall::SetUniform { slot: s, value, .. } if *s == slot => last = Some(*value),
                DeviceCall::DrawIndexedRange(_) => {
                    if draws_seen == draw_index {
                        return last;
                    }
                    draws_seen += 1;
                }
                _ => {}
            }
        }
        None
    }

    /// `(target, byte length)` of every upload in order.
    pub fn allocations(&self) -> Vec<(BufferTarget, usize)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::AllocateBuffer { target, bytes, .. } => Some((*target, *bytes)),
                _ => None,
            })
            .collect()
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn next_raw(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn program(&self, program: ProgramId) -> RenderResult<&ProgramState> {
        self.programs
            .get(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))
    }

    fn bound_index_buffer(&self) -> Option<BufferId> {
        match self.bound_vertex_array {
            Some(vao) => self.vertex_arrays.get(&vao).and_then(|v| v.index_buffer),
            None => self.loose_index_buffer,
        }
    }

    fn linked_program_table(&self, program: ProgramId, table: &HashMap<String, u32>, name: &str) -> Option<u32> {
        let state = self.programs.get(&program)?;
        if !state.linked {
            return None;
        }
        table.get(name).copied()
    }
}

impl GraphicsDevice for RecordingDevice {
    fn create_shader_stage(&mut self, kind: ShaderStage) -> RenderResult<StageId> {
        let stage = StageId::from_raw(self.next_raw());
        self.stages.insert(stage, StageState { kind, compiled: false });
        self.calls.push(DeviceCall::CreateShaderStage { stage, kind });
        Ok(stage)
    }

    fn compile_shader_stage(&mut self, stage: StageId, source: &str) -> RenderResult<()> {
        let state = self
            .stages
            .get_mut(&stage)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown shader stage {stage:?}")))?;
        self.calls.push(DeviceCall::CompileShaderStage { stage, source: source.to_string() });

        if source.trim().is_empty() {
            return Err(RenderError::Compile {
                stage: state.kind,
                log: "shader source is empty".to_string(),
            });
        }
        if let Some((kind, log)) = &self.compile_failure {
            if *kind == state.kind {
                return Err(RenderError::Compile { stage: state.kind, log: log.clone() });
            }
        }
        state.compiled = true;
        Ok(())
    }

    fn delete_shader_stage(&mut self, stage: StageId) -> RenderResult<()> {
        self.stages
            .remove(&stage)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown shader stage {stage:?}")))?;
        for program in self.programs.values_mut() {
            program.stages.retain(|s| *s != stage);
        }
        self.calls.push(DeviceCall::DeleteShaderStage(stage));
        Ok(())
    }

    fn create_program(&mut self) -> RenderResult<ProgramId> {
        let program = ProgramId::from_raw(self.next_raw());
        self.programs.insert(program, ProgramState::default());
        self.calls.push(DeviceCall::CreateProgram(program));
        Ok(program)
    }

    fn attach_shader_stage(&mut self, program: ProgramId, stage: StageId) -> RenderResult<()> {
        if !self.stages.contains_key(&stage) {
            return Err(RenderError::invalid_state(format!("unknown shader stage {stage:?}")));
        }
        let state = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;
        if !state.stages.contains(&stage) {
            state.stages.push(stage);
        }
        self.calls.push(DeviceCall::AttachShaderStage { program, stage });
        Ok(())
    }

    fn detach_shader_stage(&mut self, program: ProgramId, stage: StageId) -> RenderResult<()> {
        let state = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;
        if !state.stages.contains(&stage) {
            return Err(RenderError::invalid_state(format!(
                "stage {stage:?} is not attached to {program:?}"
            )));
        }
        state.stages.retain(|s| *s != stage);
        self.calls.push(DeviceCall::DetachShaderStage { program, stage });
        Ok(())
    }

    fn link_program(&mut self, program: ProgramId) -> RenderResult<()> {
        let state = self.program(program)?;
        let compiled_kinds: Vec<ShaderStage> = state
            .stages
            .iter()
            .filter_map(|s| self.stages.get(s))
            .filter(|s| s.compiled)
            .map(|s| s.kind)
            .collect();
        self.calls.push(DeviceCall::LinkProgram(program));

        for kind in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if !compiled_kinds.contains(&kind) {
                return Err(RenderError::Link { log: format!("no compiled {kind} stage attached") });
            }
        }
        if let Some(log) = &self.link_failure {
            return Err(RenderError::Link { log: log.clone() });
        }
        if let Some(state) = self.programs.get_mut(&program) {
            state.linked = true;
        }
        Ok(())
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.linked_program_table(program, &self.attributes, name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.linked_program_table(program, &self.uniforms, name)
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        self.programs
            .remove(&program)
            .ok_or_else(|| RenderError::invalid_state(format!("unknown program {program:?}")))?;
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
        self.calls.push(DeviceCall::DeleteProgram(program));
        Ok(())
    }

    fn create_vertex_array(&mut self) -> RenderResult<VertexArrayId> {
        let vao = VertexArrayId::from_raw(self.next_raw());
        self.vertex_arrays.insert(vao, VertexArrayState::default());
        self.calls.push(DeviceCall::CreateVertexArray(vao));
        Ok(vao)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> RenderResult<()> {
        self.vertex_arrays.remove(&vertex_array).ok_or_else(|| {
            RenderError::invalid_state(format!("unknown vertex array {vertex_array:?}"))
        })?;
        if self.bound_vertex_array == Some(vertex_array) {
            self.bound_vertex_array = None;
        }
        self.calls.push(DeviceCall::DeleteVertexArray(vertex_array));
        Ok(())
    }

    fn create_buffer(&mut self, target: BufferTarget) -> RenderResult<BufferId> {
        let buffer = BufferId::from_raw(self.next_raw());
        self.buffers.insert(buffer, BufferState { target, len: 0 });
        self.calls.push(DeviceCall::CreateBuffer { buffer, target });
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
        }
        self.calls.push(DeviceCall::DeleteBuffer(buffer));
        Ok(())
    }

    fn bind_program(&mut self, program: Option<ProgramId>) -> RenderResult<()> {
        if let Some(p) = program {
            if !self.program(p)?.linked {
                return Err(RenderError::invalid_state(format!("program {p:?} is not linked")));
            }
        }
        self.bound_program = program;
        self.calls.push(DeviceCall::BindProgram(program));
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) -> RenderResult<()> {
        if let Some(v) = vertex_array {
            if !self.vertex_arrays.contains_key(&v) {
                return Err(RenderError::invalid_state(format!("unknown vertex array {v:?}")));
            }
        }
        self.bound_vertex_array = vertex_array;
        self.calls.push(DeviceCall::BindVertexArray(vertex_array));
        Ok(())
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) -> RenderResult<()> {
        if let Some(b) = buffer {
            let state = self
                .buffers
                .get(&b)
                .ok_or_else(|| RenderError::invalid_state(format!("unknown buffer {b:?}")))?;
            if state.target != target {
                return Err(RenderError::invalid_state(format!(
                    "buffer {b:?} was created for {:?}, not {target:?}",
                    state.target
                )));
            }
        }
        match target {
            BufferTarget::Vertex => self.bound_vertex_buffer = buffer,
            BufferTarget::Index => match self.bound_vertex_array {
                Some(vao) => {
                    if let Some(state) = self.vertex_arrays.get_mut(&vao) {
                        state.index_buffer = buffer;
                    }
                }
                None => self.loose_index_buffer = buffer,
            },
        }
        self.calls.push(DeviceCall::BindBuffer { target, buffer });
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
        if let Some(state) = self.buffers.get_mut(&buffer) {
            state.len = data.len();
        }
        self.calls.push(DeviceCall::AllocateBuffer { target, buffer, bytes: data.len(), usage });
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
        self.calls.push(DeviceCall::EnableAttribute(slot));
        Ok(())
    }

    fn set_attribute_buffer(&mut self, slot: u32, layout: AttributeLayout) -> RenderResult<()> {
        if self.bound_vertex_array.is_none() {
            return Err(RenderError::invalid_state("no vertex array bound"));
        }
        let buffer = self
            .bound_vertex_buffer
            .ok_or_else(|| RenderError::invalid_state("no vertex buffer bound"))?;
        if !(1..=4).contains(&layout.components) {
            return Err(RenderError::precondition(format!(
                "attribute components must be 1..=4, got {}",
                layout.components
            )));
        }
        self.calls.push(DeviceCall::SetAttributeBuffer { slot, buffer, layout });
        Ok(())
    }

    fn set_uniform(&mut self, slot: u32, value: UniformValue) -> RenderResult<()> {
        let program = self
            .bound_program
            .ok_or_else(|| RenderError::invalid_state("no program bound for uniform upload"))?;
        if !self.uniforms.values().any(|s| *s == slot) {
            return Err(RenderError::precondition(format!("program has no uniform at slot {slot}")));
        }
        self.calls.push(DeviceCall::SetUniform { program, slot, value });
        Ok(())
    }

    fn draw_indexed_range(&mut self, draw: DrawIndexed) -> RenderResult<()> {
        if self.bound_program.is_none() {
            return Err(RenderError::invalid_state("draw without a bound program"));
        }
        if self.bound_vertex_array.is_none() {
            return Err(RenderError::invalid_state("draw without a bound vertex array"));
        }
        if !draw.index_type.is_index() {
            return Err(RenderError::precondition(format!(
                "{:?} is not an index type",
                draw.index_type
            )));
        }
        let size = draw.index_type.size_bytes() as u64;
        if draw.byte_offset % size != 0 {
            return Err(RenderError::precondition(format!(
                "index byte offset {} is not aligned to {size}",
                draw.byte_offset
            )));
        }
        let buffer = self
            .bound_index_buffer()
            .ok_or_else(|| RenderError::invalid_state("draw without an index buffer"))?;
        let len = self.buffers.get(&buffer).map_or(0, |b| b.len) as u64;
        let end = draw.byte_offset + draw.index_count as u64 * size;
        if end > len {
            return Err(RenderError::precondition(format!(
                "draw reads index bytes up to {end}, buffer holds {len}"
            )));
        }
        self.calls.push(DeviceCall::DrawIndexedRange(draw));
        Ok(())
    }

    fn clear(&mut self, mask: ClearMask) -> RenderResult<()> {
        self.calls.push(DeviceCall::Clear(mask));
        Ok(())
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> RenderResult<()> {
        self.calls.push(DeviceCall::SetViewport { x, y, width, height });
        Ok(())
    }

    fn set_clear_color(&mut self, color: Color) -> RenderResult<()> {
        self.calls.push(DeviceCall::SetClearColor(color));
        Ok(())
    }
}
