use crate::paint::Color;

/// Second-range tint used by the default two-range draw.
pub const OVERRIDE_COLOR: Color = Color::new(0.0, 0.7, 0.3, 1.0);

/// A contiguous slice of the index buffer drawn with one color.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DrawRange {
    /// First index (in elements, not bytes).
    pub first: u32,
    pub count: u32,
    /// `None` draws with the object's own color.
    pub color: Option<Color>,
}

impl DrawRange {
    /// Range drawn with the owning object's color.
    #[inline]
    pub const fn own(first: u32, count: u32) -> Self {
        Self { first, count, color: None }
    }

    /// Range drawn with a fixed color.
    #[inline]
    pub const fn tinted(first: u32, count: u32, color: Color) -> Self {
        Self { first, count, color: Some(color) }
    }

    /// One past the last index read.
    #[inline]
    pub fn end(&self) -> u64 {
        self.first as u64 + self.count as u64
    }

    /// Two triangles from one index buffer: `[0, 3)` in the object's color,
    /// `[3, 6)` in [`OVERRIDE_COLOR`].
    pub fn default_pair() -> Vec<DrawRange> {
        vec![DrawRange::own(0, 3), DrawRange::tinted(3, 3, OVERRIDE_COLOR)]
    }
}
