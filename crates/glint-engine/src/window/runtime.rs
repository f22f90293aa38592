use anyhow::{Context, Result, anyhow};
use ouroboros::self_referencing;

use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::backend::{Gpu, GpuInit, SurfaceErrorAction, WgpuDevice};
use crate::core::{App, AppControl};

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    /// Smallest inner size the window can be resized to.
    pub min_size: Option<LogicalSize<f64>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "glint".to_string(),
            initial_size: LogicalSize::new(1000.0, 1000.0),
            min_size: Some(LogicalSize::new(600.0, 600.0)),
        }
    }
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    /// Opens one window and drives `app` until it closes.
    ///
    /// Returns the first error raised by the app or the GPU layer; the loop
    /// exits on it.
    pub fn run<A>(config: RuntimeConfig, gpu_init: GpuInit, app: A) -> Result<()>
    where
        A: App + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(config, gpu_init, app);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        match state.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[self_referencing]
struct WindowEntry {
    window: Window,

    #[borrows(window)]
    #[covariant]
    gpu: Gpu<'this>,
}

struct AppState<A: App + 'static> {
    config: RuntimeConfig,
    gpu_init: GpuInit,
    app: A,

    window: Option<WindowEntry>,
    /// Created from the window's GPU; dropped before it.
    device: Option<WgpuDevice>,
    started: bool,
    error: Option<anyhow::Error>,
}

impl<A: App + 'static> AppState<A> {
    fn new(config: RuntimeConfig, gpu_init: GpuInit, app: A) -> Self {
        Self {
            config,
            gpu_init,
            app,
            window: None,
            device: None,
            started: false,
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.close(event_loop);
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);
        if let Some(min) = self.config.min_size {
            attrs = attrs.with_min_inner_size(min);
        }

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let gpu_init = self.gpu_init.clone();
        let entry = WindowEntryTryBuilder {
            window,
            gpu_builder: |w| {
                pollster::block_on(Gpu::new(w, gpu_init)).context("GPU initialization failed")
            },
        }
        .try_build()?;

        let mut device = entry.with_gpu(|gpu| WgpuDevice::for_gpu(gpu));
        let size = entry.with_gpu(|gpu| gpu.size());

        let init = self
            .app
            .on_context_ready(&mut device)
            .context("application failed to initialize")
            .and_then(|()| self.app.on_resize(&mut device, size.width, size.height));
        if let Err(e) = init {
            // The device is dropped here; the app still gets to release what it built.
            self.app.on_close(&mut device);
            return Err(e);
        }

        entry.with_window(|w| w.request_redraw());
        self.device = Some(device);
        self.window = Some(entry);
        Ok(())
    }

    /// Lets the app release its GPU objects, then drops the device and window.
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut device) = self.device.take() {
            self.app.on_close(&mut device);
        }
        self.window = None;
        event_loop.exit();
    }

    fn resize(&mut self, new_size: PhysicalSize<u32>) -> Result<()> {
        let (Some(entry), Some(device)) = (self.window.as_mut(), self.device.as_mut()) else {
            return Ok(());
        };
        entry.with_gpu_mut(|gpu| gpu.resize(new_size));
        self.app.on_resize(device, new_size.width, new_size.height)?;
        entry.with_window(|w| w.request_redraw());
        Ok(())
    }

    fn redraw(&mut self) -> Result<AppControl> {
        let (Some(entry), Some(device)) = (self.window.as_mut(), self.device.as_mut()) else {
            return Ok(AppControl::Continue);
        };
        let app = &mut self.app;
        entry.with_gpu_mut(|gpu| render_frame(gpu, device, app))
    }
}

/// Drives one frame: the app records into the device, which is then
/// encoded into the acquired surface texture and presented.
fn render_frame<A: App>(gpu: &mut Gpu<'_>, device: &mut WgpuDevice, app: &mut A) -> Result<AppControl> {
    let size = gpu.size();
    if size.width == 0 || size.height == 0 {
        return Ok(AppControl::Continue);
    }

    let mut frame = match gpu.begin_frame() {
        Ok(frame) => frame,
        Err(err) => {
            let msg = err.to_string();
            return match gpu.handle_surface_error(err) {
                SurfaceErrorAction::Fatal => Err(anyhow!("surface error: {msg}")),
                action => {
                    log::debug!("skipping frame after surface error ({msg}): {action:?}");
                    Ok(AppControl::Continue)
                }
            };
        }
    };

    let control = app.on_frame(device)?;

    let target = gpu.target(&frame.view);
    device.encode_frame(&mut frame.encoder, &target);
    gpu.submit(frame);

    Ok(control)
}

impl<A: App + 'static> ApplicationHandler for AppState<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.started {
            return;
        }
        self.started = true;

        if let Err(e) = self.open(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);

        // Continuous redraw.
        if let Some(entry) = &self.window {
            entry.with_window(|w| w.request_redraw());
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.window.is_none() {
            return;
        }

        if self.app.on_window_event(&event) == AppControl::Exit {
            self.close(event_loop);
            return;
        }

        let result = match &event {
            WindowEvent::CloseRequested => {
                self.close(event_loop);
                Ok(())
            }

            WindowEvent::Resized(new_size) => self.resize(*new_size),

            WindowEvent::ScaleFactorChanged { .. } => {
                let new_size = self
                    .window
                    .as_ref()
                    .map(|entry| entry.with_window(|w| w.inner_size()));
                match new_size {
                    Some(size) => self.resize(size),
                    None => Ok(()),
                }
            }

            WindowEvent::RedrawRequested => match self.redraw() {
                Ok(AppControl::Exit) => {
                    self.close(event_loop);
                    Ok(())
                }
                Ok(AppControl::Continue) => Ok(()),
                Err(e) => Err(e),
            },

            _ => Ok(()),
        };

        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_keeps_a_minimum_size() {
        let config = RuntimeConfig::default();
        assert_eq!(config.min_size, Some(LogicalSize::new(600.0, 600.0)));
        assert_eq!(config.initial_size, LogicalSize::new(1000.0, 1000.0));
    }
}
