use bitflags::bitflags;
use glam::{Mat4, Vec4};

// ── handles ───────────────────────────────────────────────────────────────

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a backend-assigned id.
            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(
    /// A compiled (or compilable) unit for one pipeline stage.
    StageId
);
handle!(
    /// A program object that links a vertex and a fragment stage.
    ProgramId
);
handle!(
    /// Vertex-array object: attribute layout plus the bound index buffer.
    VertexArrayId
);
handle!(
    /// A GPU buffer object.
    BufferId
);

// ── element / buffer enums ────────────────────────────────────────────────

/// Scalar type of vertex components or indices.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ElementType {
    F32,
    U16,
    U32,
}

impl ElementType {
    #[inline]
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::U16 => 2,
            ElementType::U32 => 4,
        }
    }

    /// True for types a draw call may read indices as.
    #[inline]
    pub const fn is_index(self) -> bool {
        matches!(self, ElementType::U16 | ElementType::U32)
    }
}

/// Expected update frequency of a buffer's contents.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum UsagePattern {
    #[default]
    Static,
    Dynamic,
    Stream,
}

/// Primitive assembly mode of a draw command.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

impl Topology {
    #[inline]
    pub const fn is_strip(self) -> bool {
        matches!(self, Topology::LineStrip | Topology::TriangleStrip)
    }
}

/// Binding point a buffer is attached to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
}

bitflags! {
    /// Render targets reset by [`GraphicsDevice::clear`](super::GraphicsDevice::clear).
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct ClearMask: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

// ── commands ──────────────────────────────────────────────────────────────

/// How a vertex attribute reads from the bound vertex buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AttributeLayout {
    pub element: ElementType,
    /// Byte offset of the first component.
    pub offset: u64,
    /// Components per vertex (1..=4).
    pub components: u32,
    /// Bytes between consecutive vertices. `0` means tightly packed.
    pub stride: u64,
}

impl AttributeLayout {
    /// Stride with the tightly-packed case resolved.
    #[inline]
    pub fn effective_stride(&self) -> u64 {
        if self.stride == 0 {
            self.components as u64 * self.element.size_bytes() as u64
        } else {
            self.stride
        }
    }
}

/// A value pushed to a uniform slot.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UniformValue {
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Column-major `f32` bytes as a shader reads them.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UniformValue::Vec4(v) => bytemuck::bytes_of(v),
            UniformValue::Mat4(m) => bytemuck::bytes_of(m),
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.as_bytes().len()
    }
}

/// One indexed draw over a sub-range of the bound index buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DrawIndexed {
    pub topology: Topology,
    pub index_count: u32,
    pub index_type: ElementType,
    /// Offset into the index buffer, in bytes.
    pub byte_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tightly_packed_stride() {
        let layout = AttributeLayout {
            element: ElementType::F32,
            offset: 0,
            components: 2,
            stride: 0,
        };
        assert_eq!(layout.effective_stride(), 8);
        assert_eq!(AttributeLayout { stride: 16, ..layout }.effective_stride(), 16);
    }

    #[test]
    fn uniform_byte_sizes() {
        assert_eq!(UniformValue::Vec4(Vec4::ONE).size_bytes(), 16);
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).size_bytes(), 64);
    }

    #[test]
    fn mat4_bytes_are_column_major() {
        let m = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
        ]);
        let value = UniformValue::Mat4(m);
        let floats: &[f32] = bytemuck::cast_slice(value.as_bytes());
        assert_eq!(floats[0..4], [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(floats[12], 13.0);
    }

    #[test]
    fn index_types() {
        assert!(ElementType::U16.is_index());
        assert!(ElementType::U32.is_index());
        assert!(!ElementType::F32.is_index());
    }
}
