//! WGSL compile diagnostics and link-time reflection through naga.

use std::collections::HashMap;

use glint_shader::ShaderStage;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::device::{ElementType, RenderError, RenderResult};

/// Bytes reserved per uniform binding inside a per-draw uniform block.
/// Matches the default `min_uniform_buffer_offset_alignment`.
pub(crate) const UNIFORM_SLOT_BYTES: u64 = 256;

/// A uniform declared as `@group(0) @binding(n) var<uniform>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UniformBinding {
    pub name: String,
    pub binding: u32,
    pub size: u64,
}

/// Numeric class of a vertex input as the shader declares it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum InputKind {
    Float,
    Uint,
    Sint,
}

impl InputKind {
    /// Class a shader sees when an attribute of `element` is bound.
    pub fn of_element(element: ElementType) -> Self {
        match element {
            ElementType::F32 => InputKind::Float,
            ElementType::U16 | ElementType::U32 => InputKind::Uint,
        }
    }

    fn of_type(inner: &naga::TypeInner) -> Option<Self> {
        let scalar = match inner {
            naga::TypeInner::Scalar(scalar) => *scalar,
            naga::TypeInner::Vector { scalar, .. } => *scalar,
            _ => return None,
        };
        match scalar.kind {
            naga::ScalarKind::Float => Some(InputKind::Float),
            naga::ScalarKind::Uint => Some(InputKind::Uint),
            naga::ScalarKind::Sint => Some(InputKind::Sint),
            _ => None,
        }
    }
}

/// One validated stage.
#[derive(Debug, Clone)]
pub(crate) struct CompiledStage {
    pub stage: ShaderStage,
    pub source: String,
    pub entry_point: String,
    /// Vertex inputs by name. Empty for fragment stages.
    pub attributes: HashMap<String, u32>,
    /// Declared numeric class per vertex input location.
    pub input_kinds: HashMap<u32, InputKind>,
    pub uniforms: Vec<UniformBinding>,
}

/// Interface of a linked vertex + fragment pair.
#[derive(Debug, Clone)]
pub(crate) struct ProgramInterface {
    pub attributes: HashMap<String, u32>,
    pub input_kinds: HashMap<u32, InputKind>,
    /// Sorted by binding.
    pub uniforms: Vec<UniformBinding>,
}

impl ProgramInterface {
    /// Size of one per-draw uniform block.
    pub fn block_size(&self) -> u64 {
        self.uniforms
            .iter()
            .map(|u| (u.binding as u64 + 1) * UNIFORM_SLOT_BYTES)
            .max()
            .unwrap_or(0)
    }

    pub fn uniform(&self, binding: u32) -> Option<&UniformBinding> {
        self.uniforms.iter().find(|u| u.binding == binding)
    }
}

/// Parses and validates `source`, then reflects its entry point for `stage`.
pub(crate) fn compile(stage: ShaderStage, source: &str) -> RenderResult<CompiledStage> {
    let fail = |log: String| RenderError::Compile { stage, log };

    let module = naga::front::wgsl::parse_str(source).map_err(|e| fail(e.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| fail(e.emit_to_string(source)))?;

    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga_stage)
        .ok_or_else(|| fail(format!("no @{stage} entry point")))?;

    let mut attributes = HashMap::new();
    let mut input_kinds = HashMap::new();
    if stage == ShaderStage::Vertex {
        for arg in &entry.function.arguments {
            let inner = &module.types[arg.ty].inner;
            match (&arg.binding, inner) {
                (Some(naga::Binding::Location { location, .. }), _) => {
                    if let Some(name) = &arg.name {
                        attributes.insert(name.clone(), *location);
                    }
                    if let Some(kind) = InputKind::of_type(inner) {
                        input_kinds.insert(*location, kind);
                    }
                }
                (None, naga::TypeInner::Struct { members, .. }) => {
                    for member in members {
                        let Some(naga::Binding::Location { location, .. }) = &member.binding else {
                            continue;
                        };
                        if let Some(name) = &member.name {
                            attributes.insert(name.clone(), *location);
                        }
                        if let Some(kind) = InputKind::of_type(&module.types[member.ty].inner) {
                            input_kinds.insert(*location, kind);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut uniforms = Vec::new();
    for (_, var) in module.global_variables.iter() {
        if var.space != naga::AddressSpace::Uniform {
            continue;
        }
        let (Some(name), Some(rb)) = (&var.name, &var.binding) else {
            continue;
        };
        if rb.group != 0 {
            return Err(fail(format!("uniform '{name}' must live in @group(0), found @group({})", rb.group)));
        }
        let size = module.types[var.ty].inner.size(module.to_ctx()) as u64;
        if size > UNIFORM_SLOT_BYTES {
            return Err(fail(format!("uniform '{name}' is {size} bytes, at most {UNIFORM_SLOT_BYTES} supported")));
        }
        uniforms.push(UniformBinding { name: name.clone(), binding: rb.binding, size });
    }

    Ok(CompiledStage {
        stage,
        source: source.to_string(),
        entry_point: entry.name.clone(),
        attributes,
        input_kinds,
        uniforms,
    })
}

/// Merges the interfaces of both stages. A name bound to two bindings, or a
/// binding shared by two names, fails the link.
pub(crate) fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> RenderResult<ProgramInterface> {
    for (expected, compiled) in [(ShaderStage::Vertex, vertex), (ShaderStage::Fragment, fragment)] {
        if compiled.stage != expected {
            return Err(RenderError::Link {
                log: format!("expected a {expected} stage, got a {} stage", compiled.stage),
            });
        }
    }

    let mut uniforms: Vec<UniformBinding> = Vec::new();
    for u in vertex.uniforms.iter().chain(&fragment.uniforms) {
        match uniforms.iter().find(|e| e.name == u.name || e.binding == u.binding) {
            Some(existing) if existing == u => {}
            Some(existing) => {
                return Err(RenderError::Link {
                    log: format!(
                        "uniform '{}' @binding({}) conflicts with '{}' @binding({})",
                        u.name, u.binding, existing.name, existing.binding
                    ),
                });
            }
            None => uniforms.push(u.clone()),
        }
    }
    uniforms.sort_by_key(|u| u.binding);

    Ok(ProgramInterface {
        attributes: vertex.attributes.clone(),
        input_kinds: vertex.input_kinds.clone(),
        uniforms,
    })
}
