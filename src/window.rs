use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// The drawable surface handed to the renderer by the windowing layer.
pub trait RenderWindow: HasWindowHandle + HasDisplayHandle {
    /// Current framebuffer size in pixels.
    fn framebuffer_size(&self) -> (u32, u32);
}

impl RenderWindow for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let PhysicalSize { width, height } = self.inner_size();
        (width, height)
    }
}
