use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::ops::Deref;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::foundation::debug_messenger::DebugType;

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及光追相关扩展的函数指针，在整个应用生命周期中保持不变
pub struct GfxDevice {
    pub(crate) device: ash::Device,
    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,
    pub(crate) ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
    pub(crate) swapchain: ash::khr::swapchain::Device,

    destroyed: Cell<bool>,
}

// 创建与销毁
impl GfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_create_info: &[vk::DeviceQueueCreateInfo],
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxDevice::new");

        let device_exts = Self::required_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        log::info!(
            "device exts: {}",
            Self::required_device_exts().iter().map(|ext| format!("\n\t{:?}", ext)).join("")
        );

        // 将所有的 extension features 串成 p_next 链
        let mut all_features = vk::PhysicalDeviceFeatures2::default().features(Self::physical_device_basic_features());
        let mut extra_features = Self::physical_device_extra_features();
        unsafe {
            extra_features.iter_mut().for_each(|f| {
                let ptr = <*mut dyn vk::ExtendsPhysicalDeviceFeatures2>::cast::<vk::BaseOutStructure>(f.as_mut());
                (*ptr).p_next = all_features.p_next as _;
                all_features.p_next = ptr as _;
            });
        }

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(queue_create_info)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_ci, None) }.context("vkCreateDevice")?;

        Ok(Self {
            acceleration_structure: ash::khr::acceleration_structure::Device::new(instance, &device),
            ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device::new(instance, &device),
            debug_utils: ash::ext::debug_utils::Device::new(instance, &device),
            swapchain: ash::khr::swapchain::Device::new(instance, &device),
            device,

            destroyed: Cell::new(false),
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");
        self.destroyed.set(true);
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// 创建过程的辅助函数
impl GfxDevice {
    fn physical_device_basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            // 用于 buffer device address
            .shader_int64(true)
    }

    fn physical_device_extra_features() -> Vec<Box<dyn vk::ExtendsPhysicalDeviceFeatures2>> {
        vec![
            Box::new(vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true)),
            Box::new(vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true)),
            Box::new(vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true)),
            Box::new(vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true)),
            // present fence 依赖于此
            Box::new(vk::PhysicalDeviceSwapchainMaintenance1FeaturesEXT::default().swapchain_maintenance1(true)),
        ]
    }

    /// 必要的 device extensions，物理设备的筛选也依赖于此
    pub fn required_device_exts() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,
            ash::ext::swapchain_maintenance1::NAME,
            // RayTracing 相关的
            ash::khr::acceleration_structure::NAME,
            ash::khr::ray_tracing_pipeline::NAME,
            ash::khr::deferred_host_operations::NAME,
        ]
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }

    #[inline]
    pub fn acceleration_structure(&self) -> &ash::khr::acceleration_structure::Device {
        &self.acceleration_structure
    }

    #[inline]
    pub fn ray_tracing_pipeline(&self) -> &ash::khr::ray_tracing_pipeline::Device {
        &self.ray_tracing_pipeline
    }

    #[inline]
    pub fn debug_utils(&self) -> &ash::ext::debug_utils::Device {
        &self.debug_utils
    }

    #[inline]
    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }
}

// tools
impl GfxDevice {
    /// debug name 只用于调试，设置失败时只输出警告
    pub fn set_object_debug_name<T: vk::Handle>(&self, handle: T, name: impl AsRef<str>) {
        let name = CString::new(name.as_ref()).unwrap_or_default();
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle);
        if let Err(e) = unsafe { self.debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    #[inline]
    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        self.set_object_debug_name(handle.vk_handle(), format!("{}::{}", T::debug_type_name(), name.as_ref()));
    }

    #[inline]
    pub fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle")
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl Drop for GfxDevice {
    fn drop(&mut self) {
        debug_assert!(self.destroyed.get(), "GfxDevice must be destroyed before being dropped.");
    }
}

impl DebugType for GfxDevice {
    fn debug_type_name() -> &'static str {
        "GfxDevice"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.device.handle()
    }
}
