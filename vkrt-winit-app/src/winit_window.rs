use std::rc::Rc;

use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use vkrt_platform::{
    render_window::{RenderWindow, ResizeFlag},
    window_system::WindowSystem,
};
use winit::window::Window;

/// 渲染器使用的 winit 窗口
///
/// 持有窗口子系统的 `Rc`，最后一个窗口销毁时窗口子系统随之释放
pub struct WinitRenderWindow {
    window: Window,
    resized: ResizeFlag,
    _window_system: Rc<WindowSystem>,
}

impl WinitRenderWindow {
    pub fn new(window: Window, window_system: Rc<WindowSystem>) -> Self {
        Self {
            window,
            resized: ResizeFlag::default(),
            _window_system: window_system,
        }
    }

    /// 在 `WindowEvent::Resized` 中调用
    #[inline]
    pub fn mark_resized(&self) {
        self.resized.mark();
    }

    #[inline]
    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasWindowHandle for WinitRenderWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for WinitRenderWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl RenderWindow for WinitRenderWindow {
    fn framebuffer_extent(&self) -> [u32; 2] {
        let size = self.window.inner_size();
        [size.width, size.height]
    }

    fn take_resized(&self) -> bool {
        self.resized.take()
    }
}
