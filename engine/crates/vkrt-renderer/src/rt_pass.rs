use std::path::Path;

use ash::vk;
use vkrt_gfx::{
    basic::color::LabelColor,
    commands::command_buffer::GfxCommandBuffer,
    descriptors::{
        descriptor_layout::{GfxDescriptorBindings, GfxDescriptorSetLayout},
        descriptor_pool::GfxDescriptorSet,
    },
    pipelines::{
        rt_pipeline::{GfxRtPipeline, GfxRtPipelineCreateInfo},
        sbt::GfxSbt,
        shader::{GfxShaderGroupInfo, GfxShaderStageInfo},
    },
};

use crate::camera::RtPushConstants;

/// ray gen shader 使用的 descriptor set
///
/// - binding 0：TLAS
/// - binding 1：storage image，即当前的 swapchain image
pub struct RtBindings;
impl RtBindings {
    pub const TLAS_BINDING: u32 = 0;
    pub const OUTPUT_IMAGE_BINDING: u32 = 1;
}
impl GfxDescriptorBindings for RtBindings {
    fn bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        vec![
            vk::DescriptorSetLayoutBinding::default()
                .binding(Self::TLAS_BINDING)
                .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR),
            vk::DescriptorSetLayoutBinding::default()
                .binding(Self::OUTPUT_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR),
        ]
    }
}

/// 光追 pass：管线、SBT 以及 descriptor set layout
pub struct RtPass {
    set_layout: GfxDescriptorSetLayout<RtBindings>,
    pipeline: GfxRtPipeline,
    sbt: GfxSbt,
}

// 创建与销毁
impl RtPass {
    pub const SHADER_FILE: &'static str = "ray-tracing.spv";
    const MAX_RECURSION_DEPTH: u32 = 3;
    const MISS_COUNT: u32 = 1;
    const HIT_COUNT: u32 = 1;

    const STAGES: [GfxShaderStageInfo; 3] = [
        GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::RAYGEN_KHR,
            entry_point: c"rayGenerationProgram",
        },
        GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::MISS_KHR,
            entry_point: c"missProgram",
        },
        GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            entry_point: c"closestHitProgram",
        },
    ];

    /// group 的顺序与 SBT 的 raygen / miss / hit 一致
    const GROUPS: [GfxShaderGroupInfo; 3] = [
        GfxShaderGroupInfo::general(0),
        GfxShaderGroupInfo::general(1),
        GfxShaderGroupInfo::triangles_hit(2),
    ];

    pub fn new(shader_dir: &Path) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("RtPass::new");

        let set_layout = GfxDescriptorSetLayout::<RtBindings>::new(vk::DescriptorSetLayoutCreateFlags::empty(), "rt")?;

        let shader_path = shader_dir.join(Self::SHADER_FILE);
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
            .offset(0)
            .size(size_of::<RtPushConstants>() as u32)];
        let set_layouts = [set_layout.handle()];

        let pipeline = match GfxRtPipeline::new(
            &GfxRtPipelineCreateInfo {
                shader_path: &shader_path,
                stages: &Self::STAGES,
                groups: &Self::GROUPS,
                set_layouts: &set_layouts,
                push_constant_ranges: &push_constant_ranges,
                max_recursion_depth: Self::MAX_RECURSION_DEPTH,
            },
            "rt",
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                set_layout.destroy();
                return Err(e);
            }
        };

        let sbt = match GfxSbt::new(&pipeline, Self::MISS_COUNT, Self::HIT_COUNT, "rt-sbt") {
            Ok(sbt) => sbt,
            Err(e) => {
                pipeline.destroy();
                set_layout.destroy();
                return Err(e);
            }
        };

        Ok(Self {
            set_layout,
            pipeline,
            sbt,
        })
    }

    pub fn destroy(self) {
        self.sbt.destroy();
        self.pipeline.destroy();
        self.set_layout.destroy();
    }
}

// getters
impl RtPass {
    #[inline]
    pub fn set_layout(&self) -> &GfxDescriptorSetLayout<RtBindings> {
        &self.set_layout
    }
}

// tools
impl RtPass {
    /// 绑定管线与 descriptor set，推送相机矩阵，然后覆盖整个 extent 进行 trace
    pub fn record(
        &self,
        cmd: &GfxCommandBuffer,
        descriptor_set: &GfxDescriptorSet<RtBindings>,
        push_constants: &RtPushConstants,
        extent: vk::Extent2D,
    ) {
        cmd.begin_label("ray-trace", LabelColor::COLOR_PASS);

        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::RAY_TRACING_KHR, self.pipeline.handle());
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            self.pipeline.layout(),
            0,
            &[descriptor_set.handle()],
        );
        cmd.cmd_push_constants(
            self.pipeline.layout(),
            vk::ShaderStageFlags::RAYGEN_KHR,
            0,
            bytemuck::bytes_of(push_constants),
        );
        cmd.trace_rays(
            self.sbt.raygen_region(),
            self.sbt.miss_region(),
            self.sbt.hit_region(),
            self.sbt.callable_region(),
            [extent.width, extent.height, 1],
        );

        cmd.end_label();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_are_raygen_only() {
        let bindings = RtBindings::bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert!(bindings.iter().all(|b| b.stage_flags == vk::ShaderStageFlags::RAYGEN_KHR));
    }

    #[test]
    fn test_groups_match_sbt_order() {
        assert_eq!(RtPass::GROUPS.len() as u32, 1 + RtPass::MISS_COUNT + RtPass::HIT_COUNT);
        assert_eq!(RtPass::GROUPS[0].general, 0);
        assert_eq!(RtPass::GROUPS[1].general, 1);
        assert_eq!(RtPass::GROUPS[2].ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(RtPass::GROUPS[2].closest_hit, 2);
        assert_eq!(RtPass::STAGES[2].stage, vk::ShaderStageFlags::CLOSEST_HIT_KHR);
    }
}
