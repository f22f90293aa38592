use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ShaderSourceError;

// ── Stage ─────────────────────────────────────────────────────────────────

/// Pipeline stage a section of source belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Header line that opens a section for this stage, newline included.
    pub const fn header(self) -> &'static str {
        match self {
            ShaderStage::Vertex => VERTEX_HEADER,
            ShaderStage::Fragment => FRAGMENT_HEADER,
        }
    }

    fn from_header(line: &str) -> Option<Self> {
        match line {
            VERTEX_HEADER => Some(ShaderStage::Vertex),
            FRAGMENT_HEADER => Some(ShaderStage::Fragment),
            _ => None,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}

pub const VERTEX_HEADER: &str = "#shader vertex\n";
pub const FRAGMENT_HEADER: &str = "#shader fragment\n";

// ── Source ────────────────────────────────────────────────────────────────

/// The two compilation units extracted from one composite file.
///
/// Either section may be empty; the compiler is the one that rejects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
    /// Stages whose section appeared more than once. The last occurrence
    /// replaced the earlier ones.
    pub replaced: Vec<ShaderStage>,
}

impl ShaderSource {
    pub fn code(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    fn slot_mut(&mut self, stage: ShaderStage) -> &mut String {
        match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
        }
    }

    /// True when either section has any content.
    pub fn has_sections(&self) -> bool {
        !self.vertex.is_empty() || !self.fragment.is_empty()
    }
}

// ── Splitter ──────────────────────────────────────────────────────────────

/// Splits composite source text into vertex and fragment sections.
///
/// Lines keep their terminators. A line is a header only when it equals
/// `#shader vertex\n` or `#shader fragment\n` exactly; anything else,
/// including text that merely mentions a marker, is section content. Lines
/// before the first header are dropped.
pub fn split_str(text: &str) -> ShaderSource {
    let mut out = ShaderSource::default();
    let mut seen: Vec<ShaderStage> = Vec::with_capacity(2);

    let mut current: Option<ShaderStage> = None;
    let mut body = String::new();

    for line in text.split_inclusive('\n') {
        if let Some(stage) = ShaderStage::from_header(line) {
            if let Some(prev) = current.take() {
                commit(&mut out, &mut seen, prev, std::mem::take(&mut body));
            }
            current = Some(stage);
            continue;
        }

        if current.is_some() {
            body.push_str(line);
        }
    }

    if let Some(prev) = current {
        commit(&mut out, &mut seen, prev, body);
    }

    out
}

fn commit(out: &mut ShaderSource, seen: &mut Vec<ShaderStage>, stage: ShaderStage, body: String) {
    if seen.contains(&stage) {
        if !out.replaced.contains(&stage) {
            out.replaced.push(stage);
        }
    } else {
        seen.push(stage);
    }
    *out.slot_mut(stage) = body;
}

/// Reads `path` as UTF-8 and splits it with [`split_str`].
pub fn load_file(path: impl AsRef<Path>) -> Result<ShaderSource, ShaderSourceError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| ShaderSourceError::new(path, e))?;
    Ok(split_str(&text))
}
