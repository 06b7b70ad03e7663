use anyhow::Context;
use ash::vk;

use crate::{basic::bytes::BytesConvert, gfx::Gfx, pipelines::rt_pipeline::GfxRtPipeline, resources::buffer::GfxBuffer};

/// SBT 中某个 region 相对于 SBT 起始位置的布局
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SbtRegion {
    pub offset: vk::DeviceSize,
    pub stride: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// Shader Binding Table 的内存布局，不涉及任何 GPU 资源
///
/// shader group 的顺序为：raygen, miss..., hit...
///
/// - 每个 record 只有 handle，没有 user data，stride 对齐到 `shaderGroupHandleAlignment`
/// - 每个 region 的起始位置对齐到 `shaderGroupBaseAlignment`
/// - raygen region 的 stride 必须和 size 相同
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SbtLayout {
    handle_size: u32,
    miss_count: u32,
    hit_count: u32,

    pub raygen: SbtRegion,
    pub miss: SbtRegion,
    pub hit: SbtRegion,
    pub total_size: vk::DeviceSize,
}

impl SbtLayout {
    pub fn new(handle_size: u32, handle_alignment: u32, base_alignment: u32, miss_count: u32, hit_count: u32) -> Self {
        let handle_alignment = handle_alignment.max(1) as u64;
        let base_alignment = base_alignment.max(1) as u64;
        let handle_stride = BytesConvert::align_up(handle_size as u64, handle_alignment);

        let raygen_size = BytesConvert::align_up(handle_stride, base_alignment);
        let raygen = SbtRegion {
            offset: 0,
            stride: raygen_size,
            size: raygen_size,
        };

        let miss = SbtRegion {
            offset: raygen.offset + raygen.size,
            stride: handle_stride,
            size: BytesConvert::align_up(miss_count as u64 * handle_stride, base_alignment),
        };
        let hit = SbtRegion {
            offset: miss.offset + miss.size,
            stride: handle_stride,
            size: BytesConvert::align_up(hit_count as u64 * handle_stride, base_alignment),
        };

        Self {
            handle_size,
            miss_count,
            hit_count,
            raygen,
            miss,
            hit,
            total_size: hit.offset + hit.size,
        }
    }

    #[inline]
    pub fn group_count(&self) -> u32 {
        1 + self.miss_count + self.hit_count
    }

    /// 将紧密排列的 shader group handle 按照布局写入 SBT 的内容中，其余字节为 0
    pub fn assemble(&self, group_handles: &[u8]) -> anyhow::Result<Vec<u8>> {
        let handle_size = self.handle_size as usize;
        anyhow::ensure!(
            group_handles.len() == self.group_count() as usize * handle_size,
            "expect {} shader group handles of {} bytes, got {} bytes",
            self.group_count(),
            handle_size,
            group_handles.len()
        );

        let mut sbt_data = vec![0u8; self.total_size as usize];
        let mut copy_handle = |group_idx: usize, dst_offset: vk::DeviceSize| {
            let src = &group_handles[group_idx * handle_size..(group_idx + 1) * handle_size];
            let dst_offset = dst_offset as usize;
            sbt_data[dst_offset..dst_offset + handle_size].copy_from_slice(src);
        };

        copy_handle(0, self.raygen.offset);
        for idx in 0..self.miss_count as usize {
            copy_handle(1 + idx, self.miss.offset + idx as u64 * self.miss.stride);
        }
        for idx in 0..self.hit_count as usize {
            copy_handle(1 + self.miss_count as usize + idx, self.hit.offset + idx as u64 * self.hit.stride);
        }

        Ok(sbt_data)
    }
}

/// 位于 device local 内存中的 SBT，以及 trace rays 所需的 4 个 region
///
/// # Destroy
/// 需要手动调用 [`GfxSbt::destroy`]
pub struct GfxSbt {
    buffer: GfxBuffer,
    layout: SbtLayout,

    raygen_region: vk::StridedDeviceAddressRegionKHR,
    miss_region: vk::StridedDeviceAddressRegionKHR,
    hit_region: vk::StridedDeviceAddressRegionKHR,
    /// 没有 callable shader，全部为 0
    callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl GfxSbt {
    /// 从 pipeline 中获取 shader group handle，组装之后通过 stage buffer 传输到 SBT buffer 中
    pub fn new(pipeline: &GfxRtPipeline, miss_count: u32, hit_count: u32, debug_name: &str) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxSbt::new");
        let rt_props = Gfx::get().rt_pipeline_props();

        let layout = SbtLayout::new(
            rt_props.shader_group_handle_size,
            rt_props.shader_group_handle_alignment,
            rt_props.shader_group_base_alignment,
            miss_count,
            hit_count,
        );
        anyhow::ensure!(
            layout.group_count() == pipeline.group_count(),
            "{debug_name}: pipeline has {} shader groups, sbt expects {}",
            pipeline.group_count(),
            layout.group_count()
        );

        let sbt_data = layout.assemble(&pipeline.shader_group_handles()?)?;

        let buffer = GfxBuffer::new_with_alignment(
            layout.total_size,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk_mem::AllocationCreateFlags::empty(),
            vk_mem::MemoryUsage::AutoPreferDevice,
            Some(rt_props.shader_group_base_alignment as vk::DeviceSize),
            debug_name,
        )?;
        if let Err(e) = buffer.transfer_data_sync(&sbt_data) {
            buffer.destroy();
            return Err(e).with_context(|| format!("failed to upload sbt {debug_name}"));
        }

        let sbt_address = buffer.device_address();
        let to_vk_region = |region: &SbtRegion| {
            vk::StridedDeviceAddressRegionKHR::default()
                .device_address(sbt_address + region.offset)
                .stride(region.stride)
                .size(region.size)
        };

        log::info!("created sbt {debug_name}: {:?}", layout);
        Ok(Self {
            raygen_region: to_vk_region(&layout.raygen),
            miss_region: to_vk_region(&layout.miss),
            hit_region: to_vk_region(&layout.hit),
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
            buffer,
            layout,
        })
    }

    pub fn destroy(self) {
        self.buffer.destroy();
    }
}

// getters
impl GfxSbt {
    #[inline]
    pub fn layout(&self) -> &SbtLayout {
        &self.layout
    }

    #[inline]
    pub fn raygen_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.raygen_region
    }

    #[inline]
    pub fn miss_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.miss_region
    }

    #[inline]
    pub fn hit_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.hit_region
    }

    #[inline]
    pub fn callable_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.callable_region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_nvidia_layout() {
        let layout = SbtLayout::new(32, 32, 64, 1, 1);
        assert_eq!(layout.raygen, SbtRegion { offset: 0, stride: 64, size: 64 });
        assert_eq!(layout.miss, SbtRegion { offset: 64, stride: 32, size: 64 });
        assert_eq!(layout.hit, SbtRegion { offset: 128, stride: 32, size: 64 });
        assert_eq!(layout.total_size, 192);
        assert_eq!(layout.group_count(), 3);
    }

    #[test]
    fn test_alignment_rules_hold_for_many_devices() {
        for handle_size in [16, 32, 48, 64] {
            for handle_alignment in [4, 16, 32, 64] {
                for base_alignment in [32, 64, 128, 256] {
                    for miss_count in 1..=3 {
                        for hit_count in 1..=3 {
                            let layout =
                                SbtLayout::new(handle_size, handle_alignment, base_alignment, miss_count, hit_count);
                            let ctx = (handle_size, handle_alignment, base_alignment, miss_count, hit_count);

                            for region in [layout.raygen, layout.miss, layout.hit] {
                                assert_eq!(region.offset % base_alignment as u64, 0, "{:?}", ctx);
                                assert_eq!(region.stride % handle_alignment as u64, 0, "{:?}", ctx);
                                assert!(region.stride >= handle_size as u64, "{:?}", ctx);
                            }
                            assert_eq!(layout.raygen.stride, layout.raygen.size, "{:?}", ctx);
                            assert!(layout.miss.size >= miss_count as u64 * layout.miss.stride, "{:?}", ctx);
                            assert!(layout.hit.size >= hit_count as u64 * layout.hit.stride, "{:?}", ctx);

                            // region 之间不重叠，并且依次排列
                            assert!(layout.miss.offset >= layout.raygen.offset + layout.raygen.size, "{:?}", ctx);
                            assert!(layout.hit.offset >= layout.miss.offset + layout.miss.size, "{:?}", ctx);
                            assert_eq!(layout.total_size, layout.hit.offset + layout.hit.size, "{:?}", ctx);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_assemble_places_handles() {
        let layout = SbtLayout::new(4, 8, 16, 2, 1);
        let handles = [[1u8; 4], [2u8; 4], [3u8; 4], [4u8; 4]].concat();
        let sbt = layout.assemble(&handles).unwrap();

        assert_eq!(sbt.len() as u64, layout.total_size);
        assert_eq!(&sbt[0..4], &[1; 4]);
        assert_eq!(&sbt[4..16], &[0; 12]);

        let miss = layout.miss.offset as usize;
        assert_eq!(&sbt[miss..miss + 4], &[2; 4]);
        assert_eq!(&sbt[miss + 8..miss + 12], &[3; 4]);

        let hit = layout.hit.offset as usize;
        assert_eq!(&sbt[hit..hit + 4], &[4; 4]);
        assert!(sbt[hit + 4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_assemble_rejects_wrong_handle_count() {
        let layout = SbtLayout::new(32, 32, 64, 1, 1);
        assert!(layout.assemble(&[0u8; 64]).is_err());
    }
}
