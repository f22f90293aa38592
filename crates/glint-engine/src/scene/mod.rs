//! Scene registry.
//!
//! Responsibilities:
//! - keep the set of objects drawn each frame, in insertion order
//! - own the shared camera and apply its view matrix before each draw
//! - hand out explicit tokens for membership

mod camera;
mod registry;

pub use camera::SceneCamera;
pub use registry::{RegistryId, RegistryToken, SceneRegistry, SharedObject, shared};
