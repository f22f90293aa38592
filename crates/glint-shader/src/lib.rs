//! Splitter for composite shader sources.
//!
//! One file carries both pipeline stages under section headers:
//!
//! ```text
//! #shader vertex
//! ...vertex code...
//! #shader fragment
//! ...fragment code...
//! ```
//!
//! This crate is intentionally dependency-free so editors and build tooling
//! can split sources without linking any GPU code.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`splitter`] | `ShaderStage`, `ShaderSource`, `split_str`, `load_file` |
//! | [`error`] | `ShaderSourceError` |
//!
//! # Quick start
//!
//! ```rust
//! use glint_shader::split_str;
//!
//! let src = split_str("#shader vertex\nA\n#shader fragment\nB\n");
//! assert_eq!(src.vertex, "A\n");
//! assert_eq!(src.fragment, "B\n");
//! ```

pub mod error;
pub mod splitter;

pub use error::ShaderSourceError;
pub use splitter::{FRAGMENT_HEADER, ShaderSource, ShaderStage, VERTEX_HEADER, load_file, split_str};
