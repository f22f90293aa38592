//! Viewport controller.
//!
//! Bridges the presentation layer and the render core: meshes are described
//! up front with [`MeshDesc`], built once the device exists, and drawn every
//! frame through a [`SceneRegistry`](crate::scene::SceneRegistry).

mod controller;
mod mesh;

pub use controller::ViewportController;
pub use mesh::{MeshDesc, ShaderOrigin, ViewportConfig};
