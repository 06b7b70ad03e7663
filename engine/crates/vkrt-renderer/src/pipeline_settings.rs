use std::{fmt::Display, ops::Deref};

use ash::vk;
use vkrt_gfx::swapchain::render_swapchain::GfxSwapchainSettings;

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::B8G8R8A8_SRGB,
        // 通知 OS，将数值按照 sRGB 空间进行处理和显示
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const DEFAULT_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::MAILBOX;
    /// 期望的 swapchain image 数量，实际数量受 surface 的限制
    pub const MIN_SWAPCHAIN_IMAGE_COUNT: u32 = 3;

    pub const fn swapchain_settings() -> GfxSwapchainSettings {
        GfxSwapchainSettings {
            preferred_format: Self::DEFAULT_SURFACE_FORMAT,
            preferred_present_mode: Self::DEFAULT_PRESENT_MODE,
            min_image_count: Self::MIN_SWAPCHAIN_IMAGE_COUNT,
        }
    }
}

/// 帧标签（A/B）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLabel {
    A,
    B,
}
impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::A => &Self::INDEX[0],
            Self::B => &Self::INDEX[1],
        }
    }
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}
impl FrameLabel {
    const INDEX: [usize; 2] = [0, 1];

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx {
            0 => Self::A,
            1 => Self::B,
            _ => panic!("Invalid frame index: {idx}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_round_trip() {
        for idx in 0..2 {
            assert_eq!(*FrameLabel::from_usize(idx), idx);
        }
        assert_eq!(FrameLabel::B.to_string(), "B");
    }

    #[test]
    #[should_panic(expected = "Invalid frame index")]
    fn test_frame_label_out_of_range() {
        FrameLabel::from_usize(2);
    }

    #[test]
    fn test_swapchain_settings() {
        let settings = DefaultRendererSettings::swapchain_settings();
        assert_eq!(settings.preferred_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(settings.preferred_present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(settings.min_image_count, 3);
    }
}
