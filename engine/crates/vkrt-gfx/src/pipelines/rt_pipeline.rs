use std::path::Path;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    pipelines::shader::{GfxShaderGroupInfo, GfxShaderModule, GfxShaderStageInfo},
};

/// 创建光追管线所需的全部信息
///
/// 所有 stage 都来自同一个 spv 文件
pub struct GfxRtPipelineCreateInfo<'a> {
    pub shader_path: &'a Path,
    pub stages: &'a [GfxShaderStageInfo],
    /// group 的顺序决定了 shader group handle 的顺序
    pub groups: &'a [GfxShaderGroupInfo],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    /// 仅仅是用来分配栈内存的，并不会在超过递归深度后让调用被丢弃
    pub max_recursion_depth: u32,
}

/// # Destroy
/// 需要手动调用 [`GfxRtPipeline::destroy`]
pub struct GfxRtPipeline {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    group_count: u32,
}

impl DebugType for GfxRtPipeline {
    fn debug_type_name() -> &'static str {
        "GfxRtPipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}

// 创建与销毁
impl GfxRtPipeline {
    pub fn new(create_info: &GfxRtPipelineCreateInfo, debug_name: &str) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxRtPipeline::new");
        let gfx_device = Gfx::get().gfx_device();

        let max_depth = Gfx::get().rt_pipeline_props().max_ray_recursion_depth;
        anyhow::ensure!(
            create_info.max_recursion_depth <= max_depth,
            "{debug_name}: recursion depth {} exceeds device limit {max_depth}",
            create_info.max_recursion_depth
        );

        let shader_module = GfxShaderModule::new(create_info.shader_path)?;

        let stage_infos = create_info
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::default()
                    .module(shader_module.handle())
                    .stage(stage.stage)
                    .name(stage.entry_point)
            })
            .collect_vec();
        let shader_groups = create_info.groups.iter().map(GfxShaderGroupInfo::to_vk).collect_vec();

        let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(create_info.set_layouts)
            .push_constant_ranges(create_info.push_constant_ranges);
        let pipeline_layout = match unsafe { gfx_device.create_pipeline_layout(&pipeline_layout_ci, None) } {
            Ok(layout) => layout,
            Err(e) => {
                shader_module.destroy();
                return Err(e).with_context(|| format!("vkCreatePipelineLayout: {debug_name}"));
            }
        };
        gfx_device.set_object_debug_name(pipeline_layout, format!("{debug_name}-layout"));

        let pipeline_ci = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&shader_groups)
            .layout(pipeline_layout)
            .max_pipeline_ray_recursion_depth(create_info.max_recursion_depth);

        let pipeline = unsafe {
            gfx_device.ray_tracing_pipeline.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };
        // 管线创建完成之后 shader module 就不再需要了
        shader_module.destroy();

        let pipeline = match pipeline {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { gfx_device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e).with_context(|| format!("vkCreateRayTracingPipelinesKHR: {debug_name}"));
            }
        };

        let rt_pipeline = Self {
            pipeline,
            pipeline_layout,
            group_count: shader_groups.len() as u32,
        };
        gfx_device.set_debug_name(&rt_pipeline, debug_name);
        log::info!("created rt pipeline {debug_name} with {} shader groups", rt_pipeline.group_count);
        Ok(rt_pipeline)
    }

    pub fn destroy(mut self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_pipeline(self.pipeline, None);
            gfx_device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
        self.pipeline = vk::Pipeline::null();
    }
}

// getters
impl GfxRtPipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    /// 按 group 顺序紧密排列的所有 shader group handle
    pub fn shader_group_handles(&self) -> anyhow::Result<Vec<u8>> {
        let handle_size = Gfx::get().rt_pipeline_props().shader_group_handle_size;
        unsafe {
            Gfx::get().gfx_device().ray_tracing_pipeline.get_ray_tracing_shader_group_handles(
                self.pipeline,
                0,
                self.group_count,
                (self.group_count * handle_size) as usize,
            )
        }
        .context("vkGetRayTracingShaderGroupHandlesKHR")
    }
}

impl Drop for GfxRtPipeline {
    fn drop(&mut self) {
        debug_assert!(self.pipeline == vk::Pipeline::null(), "GfxRtPipeline must be destroyed manually.");
    }
}
