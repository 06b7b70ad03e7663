use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::{
    commands::command_queue::GfxCommandQueue,
    foundation::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice,
    },
    swapchain::surface::GfxSurface,
};

pub struct GfxCore {
    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    pub(crate) vk_entry: ash::Entry,

    pub(crate) instance: GfxInstance,
    /// 未开启 validation 时为 None
    pub(crate) debug_msger: Option<GfxDebugMsger>,
    pub(crate) surface: GfxSurface,
    pub(crate) physical_device: GfxPhysicalDevice,
    pub(crate) gfx_device: GfxDevice,

    pub(crate) gfx_queue: GfxCommandQueue,
    /// 与 gfx_queue 可能是同一个 vk::Queue
    pub(crate) present_queue: GfxCommandQueue,
}

// 创建与销毁
impl GfxCore {
    pub fn new(
        app_name: &str,
        engine_name: &str,
        window: &(impl HasDisplayHandle + HasWindowHandle),
        enable_validation: bool,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxCore::new");

        let vk_entry = unsafe { ash::Entry::load() }.context("failed to load the vulkan loader")?;

        let display_handle = window.display_handle().context("window has no display handle")?;
        let window_exts = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .context("failed to query surface instance extensions")?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect_vec();

        let instance = GfxInstance::new(&vk_entry, app_name, engine_name, &window_exts, enable_validation)?;
        let debug_msger = if enable_validation {
            Some(GfxDebugMsger::new(&vk_entry, &instance.ash_instance)?)
        } else {
            None
        };

        let surface = GfxSurface::new(&vk_entry, &instance.ash_instance, window)?;
        let physical_device = GfxPhysicalDevice::select(&instance.ash_instance, &surface.pf, surface.handle)?;

        // graphics 与 present 的 queue family 不同时，需要分别创建 queue
        let gfx_family_idx = physical_device.gfx_queue_family.queue_family_index;
        let present_family_idx = physical_device.present_queue_family.queue_family_index;
        let queue_priorities = [1.0];
        let queue_create_infos = [gfx_family_idx, present_family_idx]
            .into_iter()
            .unique()
            .map(|family_idx| {
                vk::DeviceQueueCreateInfo::default().queue_family_index(family_idx).queue_priorities(&queue_priorities)
            })
            .collect_vec();

        let gfx_device = GfxDevice::new(&instance.ash_instance, physical_device.vk_handle, &queue_create_infos)?;
        let gfx_queue = GfxCommandQueue {
            vk_queue: unsafe { gfx_device.get_device_queue(gfx_family_idx, 0) },
            queue_family: physical_device.gfx_queue_family.clone(),
        };
        let present_queue = GfxCommandQueue {
            vk_queue: unsafe { gfx_device.get_device_queue(present_family_idx, 0) },
            queue_family: physical_device.present_queue_family.clone(),
        };

        log::info!("gfx queue's queue family:\n{:#?}", gfx_queue.queue_family);
        log::info!("present queue's queue family:\n{:#?}", present_queue.queue_family);

        // 在 device 之前创建的 vk::Handle
        {
            gfx_device.set_object_debug_name(instance.vk_instance(), "GfxInstance");
            gfx_device.set_debug_name(&physical_device, "main");
            gfx_device.set_debug_name(&surface, "main");
            gfx_device.set_debug_name(&gfx_device, "main");
            gfx_device.set_debug_name(&gfx_queue, "gfx");
            if present_family_idx != gfx_family_idx {
                gfx_device.set_debug_name(&present_queue, "present");
            }
        }

        Ok(Self {
            vk_entry,
            instance,
            debug_msger,
            surface,
            physical_device,
            gfx_device,
            gfx_queue,
            present_queue,
        })
    }

    pub fn destroy(self) {
        self.gfx_device.destroy();
        self.surface.destroy();
        if let Some(debug_msger) = self.debug_msger {
            debug_msger.destroy();
        }
        self.instance.destroy();
    }
}
