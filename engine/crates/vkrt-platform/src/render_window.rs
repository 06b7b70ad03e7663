use std::cell::Cell;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// 渲染器对窗口的全部需求
///
/// - window handle 与 display handle 用于创建 surface
/// - 尺寸变化是边沿触发的：[`RenderWindow::take_resized`] 读取之后会清除标记
pub trait RenderWindow: HasWindowHandle + HasDisplayHandle {
    /// framebuffer 的像素尺寸，最小化时可能为 0
    fn framebuffer_extent(&self) -> [u32; 2];

    /// 自上一次调用以来窗口是否改变过尺寸
    fn take_resized(&self) -> bool;
}

/// 边沿触发的标记，窗口事件中设置，渲染器读取时清除
#[derive(Debug, Default)]
pub struct ResizeFlag {
    resized: Cell<bool>,
}

impl ResizeFlag {
    #[inline]
    pub fn mark(&self) {
        self.resized.set(true);
    }

    /// 读取并清除
    #[inline]
    pub fn take(&self) -> bool {
        self.resized.replace(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_flag_is_edge_triggered() {
        let flag = ResizeFlag::default();
        assert!(!flag.take());

        flag.mark();
        flag.mark();
        assert!(flag.take());
        assert!(!flag.take());
    }
}
