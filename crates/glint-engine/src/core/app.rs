use winit::event::WindowEvent;

use crate::device::GraphicsDevice;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract driven by the window runtime.
///
/// Every callback receives the live device; nothing is reachable globally.
pub trait App {
    /// Called once, after the GPU context exists and before the first frame.
    /// An error aborts startup.
    fn on_context_ready(&mut self, dev: &mut dyn GraphicsDevice) -> anyhow::Result<()>;

    /// Called with the new framebuffer size in physical pixels.
    fn on_resize(
        &mut self,
        dev: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        let _ = (dev, width, height);
        Ok(())
    }

    /// Called for window events before the runtime handles them.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// Called once per rendered frame.
    fn on_frame(&mut self, dev: &mut dyn GraphicsDevice) -> anyhow::Result<AppControl>;

    /// Called once before the GPU context is dropped.
    fn on_close(&mut self, dev: &mut dyn GraphicsDevice) {
        let _ = dev;
    }
}
