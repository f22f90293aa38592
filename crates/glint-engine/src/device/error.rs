use std::fmt;

use glint_shader::{ShaderSourceError, ShaderStage};

/// Errors raised by render objects, the scene registry and device backends.
#[derive(Debug)]
pub enum RenderError {
    /// Shader source file missing or unreadable.
    Io(ShaderSourceError),
    /// A shader stage failed to compile.
    Compile { stage: ShaderStage, log: String },
    /// The program failed to link.
    Link { log: String },
    /// Operation invoked outside the valid lifecycle or binding window.
    InvalidState(String),
    /// Malformed input: sizes, ranges or element types that cannot be honored.
    Precondition(String),
}

impl RenderError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        RenderError::InvalidState(msg.into())
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        RenderError::Precondition(msg.into())
    }

    /// True for errors that leave the object unusable (IO/compile/link).
    pub fn is_build_failure(&self) -> bool {
        matches!(self, RenderError::Io(_) | RenderError::Compile { .. } | RenderError::Link { .. })
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Io(e) => write!(f, "{e}"),
            RenderError::Compile { stage, log } => {
                write!(f, "{stage} shader failed to compile: {log}")
            }
            RenderError::Link { log } => write!(f, "shader program failed to link: {log}"),
            RenderError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            RenderError::Precondition(msg) => write!(f, "precondition violated: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShaderSourceError> for RenderError {
    fn from(e: ShaderSourceError) -> Self {
        RenderError::Io(e)
    }
}
