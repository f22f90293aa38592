use std::path::PathBuf;

use glam::Mat4;
use glint_shader::ShaderSource;

use crate::device::{ElementType, Topology, UsagePattern};
use crate::paint::Color;
use crate::render::{DrawRange, default_projection};
use crate::scene::SceneCamera;

/// Where a mesh's composite shader comes from.
#[derive(Debug, Clone)]
pub enum ShaderOrigin {
    /// Read and split at context creation.
    File(PathBuf),
    /// Already split.
    Source(ShaderSource),
}

impl ShaderOrigin {
    /// Splits `text` now.
    pub fn inline(text: &str) -> Self {
        ShaderOrigin::Source(glint_shader::split_str(text))
    }
}

/// Declarative description of one object built by the controller.
#[derive(Debug, Clone)]
pub struct MeshDesc {
    pub name: String,
    pub shader: ShaderOrigin,
    /// Interleaved 2D positions.
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub vertex_type: ElementType,
    pub index_type: ElementType,
    pub usage: UsagePattern,
    pub topology: Topology,
    pub color: Color,
    /// `None` keeps the object's default two-range split.
    pub ranges: Option<Vec<DrawRange>>,
}

impl MeshDesc {
    pub fn new(
        name: impl Into<String>,
        shader: ShaderOrigin,
        vertices: Vec<f32>,
        indices: Vec<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            shader,
            vertices,
            indices,
            vertex_type: ElementType::F32,
            index_type: ElementType::U32,
            usage: UsagePattern::Static,
            topology: Topology::Triangles,
            color: Color::white(),
            ranges: None,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_usage(mut self, usage: UsagePattern) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_index_type(mut self, index_type: ElementType) -> Self {
        self.index_type = index_type;
        self
    }

    pub fn with_ranges(mut self, ranges: Vec<DrawRange>) -> Self {
        self.ranges = Some(ranges);
        self
    }
}

/// Frame-wide settings of a [`ViewportController`](super::ViewportController).
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportConfig {
    pub clear_color: Color,
    /// Applied to every mesh after upload.
    pub projection: Mat4,
    pub camera: SceneCamera,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            clear_color: Color::from_u8(64, 64, 64, 0),
            projection: default_projection(),
            camera: SceneCamera::default(),
        }
    }
}
