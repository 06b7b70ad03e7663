use anyhow::Context;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::foundation::debug_messenger::DebugType;

/// 窗口对应的 vk surface
///
/// 在 swapchain 重建的过程中保持不变，生命周期与 [`crate::gfx_core::GfxCore`] 相同
pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

// 创建与销毁
impl GfxSurface {
    pub fn new(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        window: &(impl HasDisplayHandle + HasWindowHandle),
    ) -> anyhow::Result<Self> {
        let surface_pf = ash::khr::surface::Instance::new(vk_entry, instance);

        let display_handle = window.display_handle().context("window has no display handle")?;
        let window_handle = window.window_handle().context("window has no window handle")?;
        let surface = unsafe {
            ash_window::create_surface(vk_entry, instance, display_handle.as_raw(), window_handle.as_raw(), None)
        }
        .context("failed to create window surface")?;

        Ok(Self {
            handle: surface,
            pf: surface_pf,
        })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxSurface");
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

// getters
impl GfxSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.pf
    }
}

// 查询
impl GfxSurface {
    /// 窗口尺寸变化后 capabilities 也会变化，因此每次重建 swapchain 都需要重新查询
    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> anyhow::Result<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle) }
            .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn formats(&self, pdevice: vk::PhysicalDevice) -> anyhow::Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle) }
            .context("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self, pdevice: vk::PhysicalDevice) -> anyhow::Result<Vec<vk::PresentModeKHR>> {
        unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle) }
            .context("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl DebugType for GfxSurface {
    fn debug_type_name() -> &'static str {
        "GfxSurface"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
