use anyhow::Result;
use glint_engine::DEFAULT_SHADER;
use glint_engine::backend::GpuInit;
use glint_engine::logging::{LoggingConfig, init_logging};
use glint_engine::paint::Color;
use glint_engine::viewport::{MeshDesc, ShaderOrigin, ViewportConfig, ViewportController};
use glint_engine::window::{Runtime, RuntimeConfig};

/// Two triangles sharing the origin, in model space.
const VERTICES: [f32; 10] = [
    -0.5, -0.5, // bottom left
    0.5, -0.5, // bottom right
    0.0, 0.0, // shared
    -0.5, 0.5, // top left
    0.5, 0.5, // top right
];
const INDICES: [u32; 6] = [0, 1, 2, 2, 3, 4];

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    // Optional composite shader path; the built-in one otherwise.
    let shader = match std::env::args_os().nth(1) {
        Some(path) => {
            log::info!("using shader {}", path.to_string_lossy());
            ShaderOrigin::File(path.into())
        }
        None => ShaderOrigin::inline(DEFAULT_SHADER),
    };

    let twotris = MeshDesc::new("twotris", shader, VERTICES.to_vec(), INDICES.to_vec())
        .with_color(Color::new(1.0, 0.0, 0.0, 0.0));
    let controller = ViewportController::new(ViewportConfig::default()).with_mesh(twotris);

    Runtime::run(
        RuntimeConfig {
            title: "glint viewer".to_string(),
            ..RuntimeConfig::default()
        },
        GpuInit::default(),
        controller,
    )
}
