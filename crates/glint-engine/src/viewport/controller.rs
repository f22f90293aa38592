use anyhow::Context;

use crate::core::{App, AppControl};
use crate::device::{GraphicsDevice, RenderError, RenderResult};
use crate::render::RenderableObject;
use crate::scene::{RegistryToken, SceneRegistry, SharedObject, shared};

use super::mesh::{MeshDesc, ShaderOrigin, ViewportConfig};

/// Builds the configured meshes once a device exists, then draws them every
/// frame through a [`SceneRegistry`].
#[derive(Debug)]
pub struct ViewportController {
    config: ViewportConfig,
    meshes: Vec<MeshDesc>,
    scene: SceneRegistry,
    objects: Vec<(RegistryToken, SharedObject)>,
    ready: bool,
}

impl ViewportController {
    pub fn new(config: ViewportConfig) -> Self {
        let scene = SceneRegistry::with_camera(config.camera);
        Self {
            config,
            meshes: Vec::new(),
            scene,
            objects: Vec::new(),
            ready: false,
        }
    }

    /// Queues a mesh for construction in [`on_context_ready`](Self::on_context_ready).
    pub fn with_mesh(mut self, mesh: MeshDesc) -> Self {
        self.meshes.push(mesh);
        self
    }

    #[inline]
    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    #[inline]
    pub fn scene(&self) -> &SceneRegistry {
        &self.scene
    }

    /// Objects built so far, in registration order.
    pub fn objects(&self) -> impl Iterator<Item = &SharedObject> {
        self.objects.iter().map(|(_, o)| o)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Sets the clear color, builds every mesh and registers it.
    ///
    /// Initialization is all or nothing: when a mesh fails, every object
    /// built so far is destroyed before the error is returned, and the
    /// controller can be initialized again.
    pub fn on_context_ready(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if self.ready {
            return Err(RenderError::invalid_state("viewport context initialized twice"));
        }
        if let Err(e) = self.build_scene(dev) {
            if let Err(cleanup) = self.teardown(dev) {
                log::warn!("cleanup after failed initialization: {cleanup}");
            }
            return Err(e);
        }

        self.ready = true;
        log::info!("viewport ready with {} object(s)", self.objects.len());
        Ok(())
    }

    fn build_scene(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        dev.set_clear_color(self.config.clear_color)?;

        for mesh in &self.meshes {
            let object = shared(build_mesh(dev, mesh, &self.config)?);
            let token = match self.scene.register(&object) {
                Ok(token) => token,
                Err(e) => {
                    let _ = object.borrow_mut().destroy(dev);
                    return Err(e);
                }
            };
            self.objects.push((token, object));
        }
        Ok(())
    }

    pub fn on_resize(&mut self, dev: &mut dyn GraphicsDevice, width: u32, height: u32) -> RenderResult<()> {
        log::debug!("viewport resized to {width}x{height}");
        dev.set_viewport(0, 0, width, height)
    }

    /// Draws the scene. Fails until [`on_context_ready`](Self::on_context_ready)
    /// has succeeded, and again after [`teardown`](Self::teardown).
    pub fn on_frame(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if !self.ready {
            return Err(RenderError::invalid_state("viewport frame before the scene was built"));
        }
        self.scene.draw(dev)
    }

    /// Deregisters and destroys every object. Keeps going after a failure and
    /// returns the first one.
    pub fn teardown(&mut self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let mut first_err = None;
        for (token, object) in self.objects.drain(..) {
            self.scene.deregister(token);
            let result = match object.try_borrow_mut() {
                Ok(mut obj) => obj.destroy(dev),
                Err(_) => Err(RenderError::invalid_state(format!(
                    "{:?} is borrowed during teardown",
                    token.object()
                ))),
            };
            if let Err(e) = result {
                log::error!("teardown: {e}");
                first_err.get_or_insert(e);
            }
        }
        self.ready = false;
        first_err.map_or(Ok(()), Err)
    }
}

fn build_mesh(
    dev: &mut dyn GraphicsDevice,
    mesh: &MeshDesc,
    config: &ViewportConfig,
) -> RenderResult<RenderableObject> {
    let mut obj = RenderableObject::new(mesh.name.clone());
    obj.create_objects(dev)?;
    if let Err(e) = populate(&mut obj, dev, mesh, config) {
        if let Err(cleanup) = obj.destroy(dev) {
            log::warn!("'{}': cleanup after failed build: {cleanup}", mesh.name);
        }
        return Err(e);
    }
    Ok(obj)
}

fn populate(
    obj: &mut RenderableObject,
    dev: &mut dyn GraphicsDevice,
    mesh: &MeshDesc,
    config: &ViewportConfig,
) -> RenderResult<()> {
    match &mesh.shader {
        ShaderOrigin::File(path) => obj.build_shader(dev, path)?,
        ShaderOrigin::Source(source) => obj.build_shader_source(dev, source)?,
    }

    obj.bind_all(dev)?;
    obj.set_count(mesh.vertices.len());
    obj.set_datatype(mesh.vertex_type, mesh.index_type);
    obj.set_usage_pattern(mesh.usage);
    obj.allocate_data(dev, &mesh.vertices, &mesh.indices)?;
    obj.unbind_all(dev)?;

    obj.set_primitives(mesh.topology);
    obj.set_color(mesh.color);
    if let Some(ranges) = &mesh.ranges {
        obj.set_draw_ranges(ranges.clone());
    }
    obj.set_proj_mat(config.projection);
    Ok(())
}

impl App for ViewportController {
    fn on_context_ready(&mut self, dev: &mut dyn GraphicsDevice) -> anyhow::Result<()> {
        ViewportController::on_context_ready(self, dev).context("failed to build the scene")
    }

    fn on_resize(&mut self, dev: &mut dyn GraphicsDevice, width: u32, height: u32) -> anyhow::Result<()> {
        ViewportController::on_resize(self, dev, width, height).context("failed to resize the viewport")
    }

    fn on_frame(&mut self, dev: &mut dyn GraphicsDevice) -> anyhow::Result<AppControl> {
        ViewportController::on_frame(self, dev).context("failed to draw the scene")?;
        Ok(AppControl::Continue)
    }

    fn on_close(&mut self, dev: &mut dyn GraphicsDevice) {
        if let Err(e) = self.teardown(dev) {
            log::error!("viewport teardown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClearMask, DeviceCall, ElementType, RecordingDevice, UniformValue};
    use crate::paint::Color;
    use crate::render::{DrawRange, OVERRIDE_COLOR};
    use glint_shader::ShaderStage;

    const SHADER: &str = "#shader vertex\nvertex body\n#shader fragment\nfragment body\n";
    const VERTICES: [f32; 10] = [-0.5, -0.5, 0.5, -0.5, 0.0, 0.0, -0.5, 0.5, 0.5, 0.5];
    const INDICES: [u32; 6] = [0, 1, 2, 2, 3, 4];

    fn twotris() -> MeshDesc {
        MeshDesc::new("twotris", ShaderOrigin::inline(SHADER), VERTICES.to_vec(), INDICES.to_vec())
            .with_color(Color::new(1.0, 0.0, 0.0, 0.0))
    }

    #[test]
    fn one_frame_draws_two_ranges() {
        let mut dev = RecordingDevice::new();
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(twotris());
        viewport.on_context_ready(&mut dev).unwrap();
        assert!(viewport.is_ready());
        assert_eq!(viewport.scene().len(), 1);

        dev.take_calls();
        viewport.on_frame(&mut dev).unwrap();

        assert_eq!(dev.calls()[0], DeviceCall::Clear(ClearMask::COLOR | ClearMask::DEPTH));
        let draws = dev.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].byte_offset, 0);
        assert_eq!(draws[1].byte_offset, 12);
        assert_eq!(
            dev.uniform_at_draw(0, 1),
            Some(UniformValue::Vec4(Color::new(1.0, 0.0, 0.0, 0.0).to_vec4()))
        );
        assert_eq!(dev.uniform_at_draw(1, 1), Some(UniformValue::Vec4(OVERRIDE_COLOR.to_vec4())));
    }

    #[test]
    fn context_ready_sets_clear_color_and_uploads() {
        let mut dev = RecordingDevice::new();
        let config = ViewportConfig::default();
        let mut viewport = ViewportController::new(config.clone()).with_mesh(twotris());
        viewport.on_context_ready(&mut dev).unwrap();

        assert_eq!(dev.calls()[0], DeviceCall::SetClearColor(config.clear_color));
        assert_eq!(dev.allocations().len(), 2);

        let obj = viewport.objects().next().unwrap().borrow();
        assert_eq!(obj.count(), VERTICES.len());
        assert!(obj.projection().abs_diff_eq(config.projection, 1e-6));
    }

    #[test]
    fn context_ready_twice_is_rejected() {
        let mut dev = RecordingDevice::new();
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(twotris());
        viewport.on_context_ready(&mut dev).unwrap();
        assert!(matches!(viewport.on_context_ready(&mut dev), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn custom_ranges_and_index_type_are_applied() {
        let mut dev = RecordingDevice::new();
        let mesh = twotris()
            .with_index_type(ElementType::U16)
            .with_ranges(vec![DrawRange::own(0, 6)]);
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(mesh);
        viewport.on_context_ready(&mut dev).unwrap();

        dev.take_calls();
        viewport.on_frame(&mut dev).unwrap();
        let draws = dev.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].index_type, ElementType::U16);
        assert_eq!(draws[0].index_count, 6);
    }

    #[test]
    fn failed_build_releases_the_object() {
        let mut dev = RecordingDevice::new().failing_compile(ShaderStage::Vertex, "bad token");
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(twotris());

        let err = viewport.on_context_ready(&mut dev).unwrap_err();
        assert!(err.is_build_failure());
        assert!(!viewport.is_ready());
        assert!(viewport.scene().is_empty());
        assert_eq!(dev.live_handles(), 0);
    }

    #[test]
    fn bad_geometry_aborts_and_releases() {
        let mut dev = RecordingDevice::new();
        let mesh = MeshDesc::new("broken", ShaderOrigin::inline(SHADER), vec![0.0, 0.0], vec![0, 1, 2]);
        let mut viewport = ViewportController::new(ViewportConfig::default())
            .with_mesh(twotris())
            .with_mesh(mesh);

        let err = viewport.on_context_ready(&mut dev).unwrap_err();
        assert!(matches!(err, RenderError::Precondition(_)));
        assert!(!viewport.is_ready());
        assert!(viewport.scene().is_empty());
        assert_eq!(viewport.objects().count(), 0);
        assert_eq!(dev.live_handles(), 0);
    }

    #[test]
    fn frame_after_failed_init_draws_nothing() {
        let mut dev = RecordingDevice::new();
        let mesh = MeshDesc::new("broken", ShaderOrigin::inline(SHADER), vec![0.0, 0.0], vec![0, 1, 2]);
        let mut viewport = ViewportController::new(ViewportConfig::default())
            .with_mesh(twotris())
            .with_mesh(mesh);
        assert!(viewport.on_context_ready(&mut dev).is_err());

        dev.take_calls();
        assert!(matches!(viewport.on_frame(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(dev.draws().is_empty());
    }

    #[test]
    fn retry_after_failed_init_does_not_duplicate() {
        let mut dev = RecordingDevice::new().failing_link("first attempt");
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(twotris());
        assert!(viewport.on_context_ready(&mut dev).is_err());
        assert_eq!(dev.live_handles(), 0);

        let mut dev = RecordingDevice::new();
        viewport.on_context_ready(&mut dev).unwrap();
        assert_eq!(viewport.scene().len(), 1);
        assert_eq!(dev.live_handles(), 6);
    }

    #[test]
    fn missing_shader_file_is_io_error() {
        let mut dev = RecordingDevice::new();
        let mesh = MeshDesc::new(
            "file",
            ShaderOrigin::File(std::env::temp_dir().join("glint-viewport-missing.wgsl")),
            VERTICES.to_vec(),
            INDICES.to_vec(),
        );
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(mesh);
        assert!(matches!(viewport.on_context_ready(&mut dev), Err(RenderError::Io(_))));
        assert_eq!(dev.live_handles(), 0);
    }

    #[test]
    fn resize_forwards_viewport() {
        let mut dev = RecordingDevice::new();
        let mut viewport = ViewportController::new(ViewportConfig::default());
        viewport.on_resize(&mut dev, 1000, 800).unwrap();
        assert_eq!(dev.calls(), &[DeviceCall::SetViewport { x: 0, y: 0, width: 1000, height: 800 }]);
    }

    #[test]
    fn teardown_releases_everything() {
        let mut dev = RecordingDevice::new();
        let mut viewport = ViewportController::new(ViewportConfig::default())
            .with_mesh(twotris())
            .with_mesh(twotris().with_color(Color::white()));
        viewport.on_context_ready(&mut dev).unwrap();
        assert_eq!(dev.live_handles(), 12);

        viewport.teardown(&mut dev).unwrap();
        assert_eq!(dev.live_handles(), 0);
        assert!(viewport.scene().is_empty());
        assert!(!viewport.is_ready());

        dev.take_calls();
        assert!(matches!(viewport.on_frame(&mut dev), Err(RenderError::InvalidState(_))));
        assert!(dev.draws().is_empty());
    }

    #[test]
    fn app_frame_continues() {
        let mut dev = RecordingDevice::new();
        let mut viewport = ViewportController::new(ViewportConfig::default()).with_mesh(twotris());
        App::on_context_ready(&mut viewport, &mut dev).unwrap();
        assert_eq!(App::on_frame(&mut viewport, &mut dev).unwrap(), AppControl::Continue);
        App::on_close(&mut viewport, &mut dev);
        assert_eq!(dev.live_handles(), 0);
    }
}
