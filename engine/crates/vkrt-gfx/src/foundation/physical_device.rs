use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{
    commands::command_queue::GfxQueueFamily,
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    /// 当前 gpu 的 ray tracing 属性，SBT 的对齐规则来源于此
    pub(crate) rt_pipeline_props: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,

    /// 当前 gpu 的加速结构属性
    pub(crate) acc_struct_props: vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static>,

    pub(crate) gfx_queue_family: GfxQueueFamily,
    /// 可能与 gfx_queue_family 相同
    pub(crate) present_queue_family: GfxQueueFamily,
}

impl GfxPhysicalDevice {
    /// 选择一张满足光追需求、并且能向 surface 呈现的显卡
    ///
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn select(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> anyhow::Result<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.context("vkEnumeratePhysicalDevices")?;

        let candidates = pdevices
            .iter()
            .filter_map(|pdevice| match Self::new(*pdevice, instance, surface_loader, surface) {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    log::info!("skip physical device {:?}: {:#}", pdevice, e);
                    None
                }
            })
            .collect_vec();

        candidates
            .into_iter()
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .context("no physical device supports ray tracing and presentation to this surface")
    }

    fn new(
        pdevice: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> anyhow::Result<Self> {
        let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut acc_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let basic_props = {
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut rt_props).push_next(&mut acc_props);
            unsafe { instance.get_physical_device_properties2(pdevice, &mut props2) };
            props2.properties
        };
        // 断开 p_next 链，之后这两个结构体可以单独保存
        rt_props.p_next = std::ptr::null_mut();
        acc_props.p_next = std::ptr::null_mut();

        let device_name = basic_props.device_name_as_c_str().unwrap_or(c"<unknown>");
        log::info!("found gpu: {:?}", device_name);

        anyhow::ensure!(
            basic_props.api_version >= vk::API_VERSION_1_3,
            "{:?} only supports vulkan {}.{}",
            device_name,
            vk::api_version_major(basic_props.api_version),
            vk::api_version_minor(basic_props.api_version)
        );

        // 检查 device extensions
        let device_exts =
            unsafe { instance.enumerate_device_extension_properties(pdevice) }.context("enumerate device exts")?;
        let supported = device_exts.iter().filter_map(|ext| ext.extension_name_as_c_str().ok()).collect_vec();
        let missing: Vec<&CStr> =
            GfxDevice::required_device_exts().into_iter().filter(|ext| !supported.contains(ext)).collect();
        anyhow::ensure!(missing.is_empty(), "{:?} is missing device extensions: {:?}", device_name, missing);

        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        log::debug!("physical device: queue family props:\n{:#?}", queue_family_props);

        let to_family = |name: &str, family_idx: usize, props: &vk::QueueFamilyProperties| GfxQueueFamily {
            name: name.to_string(),
            queue_family_index: family_idx as u32,
            queue_flags: props.queue_flags,
            queue_count: props.queue_count,
        };

        // 全能的 Queue：graphics, compute, transfer
        let gfx_queue_family = queue_family_props
            .iter()
            .enumerate()
            .find(|(_, props)| {
                props.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
            })
            .map(|(idx, props)| to_family("gfx", idx, props))
            .with_context(|| format!("{:?} has no graphics queue family", device_name))?;

        // 优先使用 gfx queue family 进行 present
        let supports_present = |idx: u32| unsafe {
            surface_loader
                .get_physical_device_surface_support(pdevice, idx, surface)
                .with_context(|| format!("vkGetPhysicalDeviceSurfaceSupportKHR, queue family {idx}"))
        };
        let present_family_idx =
            choose_present_family(gfx_queue_family.queue_family_index, queue_family_props.len(), supports_present)?
                .with_context(|| format!("{:?} cannot present to the surface", device_name))?;
        let present_idx = present_family_idx as usize;
        let present_queue_family = to_family("present", present_idx, &queue_family_props[present_idx]);

        Ok(Self {
            vk_handle: pdevice,
            basic_props,
            rt_pipeline_props: rt_props,
            acc_struct_props: acc_props,
            gfx_queue_family,
            present_queue_family,
        })
    }

    #[inline]
    /// 当前 gpu 是否是独立显卡
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.vk_handle
    }

    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static> {
        &self.rt_pipeline_props
    }

    #[inline]
    pub fn acc_struct_props(&self) -> &vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static> {
        &self.acc_struct_props
    }

    #[inline]
    pub fn gfx_queue_family(&self) -> &GfxQueueFamily {
        &self.gfx_queue_family
    }

    #[inline]
    pub fn present_queue_family(&self) -> &GfxQueueFamily {
        &self.present_queue_family
    }
}

/// 优先使用 `gfx_family`，否则使用第一个支持 present 的 queue family
///
/// 查询失败时直接返回错误，而不是把该 family 当作不支持 present
pub fn choose_present_family(
    gfx_family: u32,
    family_count: usize,
    supports_present: impl Fn(u32) -> anyhow::Result<bool>,
) -> anyhow::Result<Option<u32>> {
    if supports_present(gfx_family)? {
        return Ok(Some(gfx_family));
    }
    for idx in (0..family_count as u32).filter(|idx| *idx != gfx_family) {
        if supports_present(idx)? {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_family_prefers_gfx_family() {
        assert_eq!(choose_present_family(1, 3, |_| Ok(true)).unwrap(), Some(1));
        assert_eq!(choose_present_family(0, 3, |idx| Ok(idx == 2)).unwrap(), Some(2));
        assert_eq!(choose_present_family(0, 3, |_| Ok(false)).unwrap(), None);
    }

    #[test]
    fn test_present_family_query_error_is_propagated() {
        let result = choose_present_family(0, 3, |idx| {
            if idx == 1 { Err(anyhow::anyhow!("ERROR_SURFACE_LOST_KHR")) } else { Ok(false) }
        });
        assert!(result.is_err());
    }
}
