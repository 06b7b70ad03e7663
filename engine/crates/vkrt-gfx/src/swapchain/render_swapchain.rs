use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{
        command_queue::{GfxCommandQueue, PresentOutcome},
        semaphore::GfxSemaphore,
    },
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    resources::image_view::{GfxImageView, GfxImageViewDesc},
};

/// 创建 swapchain 时的偏好设置
#[derive(Copy, Clone, Debug)]
pub struct GfxSwapchainSettings {
    pub preferred_format: vk::SurfaceFormatKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
    /// 期望的最少 image 数量，实际数量还会受 surface capabilities 的限制
    pub min_image_count: u32,
}

/// acquire 的结果
///
/// OUT_OF_DATE 不是错误，而是需要重建 swapchain 的信号
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// 一组 swapchain 资源：swapchain 本身、image、view 以及每个 image 对应的 render-to-present semaphore
///
/// resize 时整体替换，旧的一组会被延迟销毁
pub struct GfxRenderSwapchain {
    handle: vk::SwapchainKHR,

    /// 这里的 image 并非手动创建的，因此无法使用 GfxImage 类型
    images: Vec<vk::Image>,
    image_views: Vec<GfxImageView>,
    /// 与 image 一一对应，present 时等待
    present_semaphores: Vec<GfxSemaphore>,

    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

// 构建过程
impl GfxRenderSwapchain {
    /// - `framebuffer_extent`：surface 的 current extent 未定义时使用窗口的尺寸
    /// - `old_swapchain`：resize 时传入正在使用的 swapchain
    pub fn new(
        settings: &GfxSwapchainSettings,
        framebuffer_extent: [u32; 2],
        old_swapchain: Option<&GfxRenderSwapchain>,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxRenderSwapchain::new");
        let gfx = Gfx::get();
        let pdevice = gfx.physical_device().vk_handle();
        let surface = gfx.surface();

        let caps = surface.capabilities(pdevice)?;
        let extent = choose_extent(&caps, framebuffer_extent);
        anyhow::ensure!(extent.width > 0 && extent.height > 0, "cannot create a swapchain with zero extent");

        // 光追结果直接写入 swapchain image，因此 format 需要支持 storage image
        let instance = gfx.instance().ash_instance();
        let supports_storage = |format: vk::Format| {
            let props = unsafe { instance.get_physical_device_format_properties(pdevice, format) };
            props.optimal_tiling_features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
        };
        let format = choose_surface_format(&surface.formats(pdevice)?, settings.preferred_format, supports_storage)
            .context("surface reports no format usable as a storage image")?;
        let present_mode = choose_present_mode(&surface.present_modes(pdevice)?, settings.preferred_present_mode);
        let image_count = choose_image_count(&caps, settings.min_image_count);

        let gfx_family = gfx.gfx_queue().queue_family().queue_family_index;
        let present_family = gfx.present_queue().queue_family().queue_family_index;
        let (sharing_mode, family_indices) = choose_sharing_mode(gfx_family, present_family);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 Nsight 分析，STORAGE 用于 ray gen shader 写入
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::STORAGE,
            )
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.map_or(vk::SwapchainKHR::null(), |s| s.handle));

        let gfx_device = gfx.gfx_device();
        let handle = unsafe { gfx_device.swapchain.create_swapchain(&create_info, None) }
            .context("vkCreateSwapchainKHR")?;

        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            present_semaphores: Vec::new(),
            format,
            present_mode,
            extent,
        };
        // 失败时已经创建的部分随 swapchain 一起销毁
        if let Err(e) = swapchain.create_image_resources() {
            swapchain.destroy();
            return Err(e);
        }
        gfx_device.set_debug_name(&swapchain, "main");

        log::info!(
            "swapchain created: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            swapchain.images.len()
        );
        Ok(swapchain)
    }

    /// 以当前 surface capabilities 计算出的 swapchain 尺寸
    ///
    /// 最小化或恢复的过程中，窗口尺寸非 0 时 surface 仍可能报告 0x0
    pub fn surface_extent(framebuffer_extent: [u32; 2]) -> anyhow::Result<vk::Extent2D> {
        let gfx = Gfx::get();
        let caps = gfx.surface().capabilities(gfx.physical_device().vk_handle())?;
        Ok(choose_extent(&caps, framebuffer_extent))
    }

    fn create_image_resources(&mut self) -> anyhow::Result<()> {
        let gfx_device = Gfx::get().gfx_device();
        self.images = unsafe { gfx_device.swapchain.get_swapchain_images(self.handle) }
            .context("vkGetSwapchainImagesKHR")?;

        for (idx, image) in self.images.iter().enumerate() {
            gfx_device.set_object_debug_name(*image, format!("swapchain-image-{idx}"));
            self.image_views.push(GfxImageView::new(
                *image,
                GfxImageViewDesc::new_2d(self.format.format, vk::ImageAspectFlags::COLOR, 1),
                format!("swapchain-{idx}"),
            )?);
            self.present_semaphores.push(GfxSemaphore::new(&format!("render-to-present-{idx}"))?);
        }
        Ok(())
    }

    /// 立即销毁，调用者需要保证 present engine 已经不再使用这些资源
    pub fn destroy(self) {
        log::info!("destroying swapchain {:?}", self.handle);
        self.image_views.into_iter().for_each(GfxImageView::destroy);
        self.present_semaphores.into_iter().for_each(GfxSemaphore::destroy);
        unsafe {
            Gfx::get().gfx_device().swapchain.destroy_swapchain(self.handle, None);
        }
    }
}

// getters
impl GfxRenderSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image(&self, image_index: u32) -> vk::Image {
        self.images[image_index as usize]
    }

    #[inline]
    pub fn image_view(&self, image_index: u32) -> &GfxImageView {
        &self.image_views[image_index as usize]
    }

    #[inline]
    pub fn present_semaphore(&self, image_index: u32) -> &GfxSemaphore {
        &self.present_semaphores[image_index as usize]
    }
}

// tools
impl GfxRenderSwapchain {
    /// timeout: nano seconds
    pub fn acquire_next_image(&self, semaphore: &GfxSemaphore, timeout_ns: u64) -> anyhow::Result<AcquireOutcome> {
        let result = unsafe {
            Gfx::get().gfx_device().swapchain.acquire_next_image(
                self.handle,
                timeout_ns,
                semaphore.handle(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("vkAcquireNextImageKHR"),
        }
    }

    /// 等待 image 对应的 present semaphore，present 完成后 signal `present_fence`
    #[inline]
    pub fn present_image(
        &self,
        queue: &GfxCommandQueue,
        image_index: u32,
        present_fence: vk::Fence,
    ) -> anyhow::Result<PresentOutcome> {
        queue.present(self.handle, image_index, self.present_semaphore(image_index).handle(), present_fence)
    }
}

impl DebugType for GfxRenderSwapchain {
    fn debug_type_name() -> &'static str {
        "GfxRenderSwapchain"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// current extent 为 u32::MAX 时，表示 surface 的尺寸由 swapchain 决定，此时使用窗口的尺寸
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_extent: [u32; 2]) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer_extent[0].clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer_extent[1].clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// 优先使用 `preferred`，否则使用第一个可用的 format
///
/// `is_usable` 用于过滤掉不满足 image usage 的 format
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
    is_usable: impl Fn(vk::Format) -> bool,
) -> Option<vk::SurfaceFormatKHR> {
    let usable = formats.iter().filter(|f| is_usable(f.format)).copied().collect_vec();
    usable
        .iter()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or(usable.first())
        .copied()
}

/// FIFO 一定是受支持的
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) { preferred } else { vk::PresentModeKHR::FIFO }
}

/// max_image_count == 0，表示不限制 image 数量
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, desired_min: u32) -> u32 {
    let count = u32::max(desired_min, caps.min_image_count);
    if caps.max_image_count > 0 { count.min(caps.max_image_count) } else { count }
}

/// graphics 与 present 的 queue family 不同时，image 需要在两个 family 之间共享
pub fn choose_sharing_mode(gfx_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if gfx_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![gfx_family, present_family])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: [u32; 2], min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current[0],
                height: current[1],
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            min_image_count: min_count,
            max_image_count: max_count,
            ..Default::default()
        }
    }

    const SRGB: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    const UNORM: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    const RGBA_UNORM: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    #[test]
    fn test_extent_uses_current_extent_when_defined() {
        assert_eq!(choose_extent(&caps([800, 600], 2, 8), [1920, 1080]), vk::Extent2D {
            width: 800,
            height: 600
        });
    }

    #[test]
    fn test_extent_clamps_framebuffer_when_undefined() {
        let extent = choose_extent(&caps([u32::MAX, u32::MAX], 2, 8), [5000, 0]);
        assert_eq!(extent, vk::Extent2D {
            width: 4096,
            height: 1
        });
    }

    #[test]
    fn test_extent_follows_minimized_surface() {
        // 窗口尚未报告最小化，surface 已经是 0x0
        assert_eq!(choose_extent(&caps([0, 0], 2, 8), [1280, 720]), vk::Extent2D {
            width: 0,
            height: 0
        });
    }

    #[test]
    fn test_format_prefers_srgb() {
        assert_eq!(choose_surface_format(&[UNORM, SRGB], SRGB, |_| true), Some(SRGB));
        assert_eq!(choose_surface_format(&[RGBA_UNORM, UNORM], SRGB, |_| true), Some(RGBA_UNORM));
        assert_eq!(choose_surface_format(&[], SRGB, |_| true), None);
    }

    #[test]
    fn test_format_skips_unusable() {
        let no_srgb_storage = |f: vk::Format| f != vk::Format::B8G8R8A8_SRGB;
        assert_eq!(choose_surface_format(&[SRGB, UNORM], SRGB, no_srgb_storage), Some(UNORM));
        assert_eq!(choose_surface_format(&[SRGB], SRGB, no_srgb_storage), None);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let mailbox = vk::PresentModeKHR::MAILBOX;
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO, mailbox], mailbox), mailbox);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps([1, 1], 2, 8), 3), 3);
        assert_eq!(choose_image_count(&caps([1, 1], 4, 8), 3), 4);
        assert_eq!(choose_image_count(&caps([1, 1], 2, 2), 3), 2);
        // 0 表示没有上限
        assert_eq!(choose_image_count(&caps([1, 1], 1, 0), 3), 3);
    }

    #[test]
    fn test_sharing_mode() {
        assert_eq!(choose_sharing_mode(0, 0), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(choose_sharing_mode(0, 2), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }
}
