use std::ffi::CStr;
use std::path::Path;

use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。管线创建完成之后即可销毁
pub struct GfxShaderModule {
    handle: vk::ShaderModule,
}

impl GfxShaderModule {
    /// * path - spv shader 文件路径
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let mut file =
            std::fs::File::open(path).with_context(|| format!("failed to open shader {}", path.display()))?;
        let shader_code =
            ash::util::read_spv(&mut file).with_context(|| format!("{} is not valid spir-v", path.display()))?;

        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);
        let handle = unsafe { gfx_device.create_shader_module(&shader_module_info, None) }
            .with_context(|| format!("vkCreateShaderModule: {}", path.display()))?;

        let shader_module = Self { handle };
        gfx_device.set_debug_name(&shader_module, path.to_string_lossy());
        Ok(shader_module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_shader_module(self.handle, None);
        }
        self.handle = vk::ShaderModule::null();
    }
}

impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::ShaderModule::null(), "GfxShaderModule must be destroyed manually before drop.");
    }
}

impl DebugType for GfxShaderModule {
    fn debug_type_name() -> &'static str {
        "GfxShaderModule"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// 同一个 spv 中的一个入口
#[derive(Clone, Copy, Debug)]
pub struct GfxShaderStageInfo {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'static CStr,
}

/// 用于 RayTracing Pipeline 的创建
///
/// general, closest_hit 等字段是 shader stage 在 stages 数组中的 index
#[derive(Clone, Copy, Debug)]
pub struct GfxShaderGroupInfo {
    pub ty: vk::RayTracingShaderGroupTypeKHR,
    pub general: u32,
    pub closest_hit: u32,
    pub any_hit: u32,
    pub intersection: u32,
}

impl GfxShaderGroupInfo {
    pub const fn unused() -> Self {
        Self {
            ty: vk::RayTracingShaderGroupTypeKHR::GENERAL,
            general: vk::SHADER_UNUSED_KHR,
            closest_hit: vk::SHADER_UNUSED_KHR,
            any_hit: vk::SHADER_UNUSED_KHR,
            intersection: vk::SHADER_UNUSED_KHR,
        }
    }

    pub const fn general(stage_index: u32) -> Self {
        Self {
            general: stage_index,
            ..Self::unused()
        }
    }

    pub const fn triangles_hit(closest_hit_index: u32) -> Self {
        Self {
            ty: vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP,
            closest_hit: closest_hit_index,
            ..Self::unused()
        }
    }

    pub fn to_vk(&self) -> vk::RayTracingShaderGroupCreateInfoKHR<'static> {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(self.ty)
            .general_shader(self.general)
            .closest_hit_shader(self.closest_hit)
            .any_hit_shader(self.any_hit)
            .intersection_shader(self.intersection)
    }
}
