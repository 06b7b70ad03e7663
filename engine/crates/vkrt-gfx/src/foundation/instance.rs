use std::collections::HashSet;
use std::ffi::{CStr, CString, c_char};

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::foundation::debug_messenger::GfxDebugMsger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle
    ///
    /// 生命周期由 [`GfxInstance::destroy`] 手动控制
    pub(crate) ash_instance: ash::Instance,
}

impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// - `window_exts`：窗口系统创建 surface 所需的 instance extensions
    /// - `enable_validation`：validation layer 不存在时只会给出警告
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        window_exts: &[&'static CStr],
        enable_validation: bool,
    ) -> anyhow::Result<Self> {
        let app_name = CString::new(app_name).context("app name contains a nul byte")?;
        let engine_name = CString::new(engine_name).context("engine name contains a nul byte")?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3)
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_c_str())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, window_exts)?;
        log::info!(
            "instance extensions: {}",
            enabled_extensions.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        let enabled_layers = Self::get_layers(vk_entry, enable_validation)?;
        log::info!(
            "instance layers: {}",
            enabled_layers.iter().map(|layer| format!("\n\t{:?}", unsafe { CStr::from_ptr(*layer) })).join("")
        );

        // 为 instance info 添加 debug messenger，捕获 create/destroy instance 期间的消息
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers)
            .push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.context("vkCreateInstance")?;

        Ok(Self { ash_instance })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

/// getter
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}

/// 构造过程
impl GfxInstance {
    /// instance 所需的，且受支持的 extension；缺少任何一个都是致命错误
    fn get_extensions(vk_entry: &ash::Entry, window_exts: &[&'static CStr]) -> anyhow::Result<Vec<*const c_char>> {
        let all_ext_props =
            unsafe { vk_entry.enumerate_instance_extension_properties(None) }.context("enumerate instance exts")?;
        let supported = all_ext_props.iter().filter_map(|props| props.extension_name_as_c_str().ok()).collect_vec();

        let mut enabled: HashSet<&'static CStr> = HashSet::new();
        for ext in window_exts.iter().copied().chain(Self::basic_instance_exts()) {
            anyhow::ensure!(supported.contains(&ext), "required instance extension {:?} is missing", ext);
            enabled.insert(ext);
        }

        Ok(enabled.into_iter().map(CStr::as_ptr).collect_vec())
    }

    fn get_layers(vk_entry: &ash::Entry, enable_validation: bool) -> anyhow::Result<Vec<*const c_char>> {
        if !enable_validation {
            return Ok(Vec::new());
        }

        let all_layer_props =
            unsafe { vk_entry.enumerate_instance_layer_properties() }.context("enumerate instance layers")?;
        let has_validation = all_layer_props
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));

        if has_validation {
            Ok(vec![VALIDATION_LAYER.as_ptr()])
        } else {
            log::warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
            Ok(Vec::new())
        }
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> Vec<&'static CStr> {
        vec![
            // debug messenger、object debug name、command label
            ash::ext::debug_utils::NAME,
            // VK_EXT_swapchain_maintenance1 的依赖，用于 present fence
            ash::khr::get_surface_capabilities2::NAME,
            ash::ext::surface_maintenance1::NAME,
        ]
    }
}
