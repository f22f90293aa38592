use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Failure to read a composite shader source file.
#[derive(Debug)]
pub struct ShaderSourceError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl ShaderSourceError {
    pub(crate) fn new(path: &Path, source: io::Error) -> Self {
        Self { path: path.to_path_buf(), source }
    }
}

impl fmt::Display for ShaderSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read shader source {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for ShaderSourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
