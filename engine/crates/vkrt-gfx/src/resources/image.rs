use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::{
    commands::{barrier::GfxImageBarrier, command_buffer::GfxCommandBuffer},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    resources::{
        buffer::GfxBuffer,
        image_view::{GfxImageView, GfxImageViewDesc},
    },
};

/// Vulkan 格式相关的工具类
pub struct VulkanFormatUtils;
impl VulkanFormatUtils {
    /// 每个 texel 需要的字节数，不支持的格式（压缩格式等）返回 None
    pub fn texel_size_in_bytes(format: vk::Format) -> Option<usize> {
        let size = match format {
            vk::Format::R8_UNORM | vk::Format::R8_SRGB | vk::Format::R8_UINT | vk::Format::S8_UINT => 1,
            vk::Format::R8G8_UNORM
            | vk::Format::R8G8_SRGB
            | vk::Format::R16_SFLOAT
            | vk::Format::R16_UNORM
            | vk::Format::D16_UNORM => 2,
            vk::Format::R8G8B8_UNORM | vk::Format::R8G8B8_SRGB | vk::Format::B8G8R8_UNORM | vk::Format::B8G8R8_SRGB => 3,
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::R16G16_SFLOAT
            | vk::Format::R32_SFLOAT
            | vk::Format::R32_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::A2B10G10R10_UNORM_PACK32 => 4,
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::R16G16B16A16_UNORM | vk::Format::R32G32_SFLOAT => 8,
            vk::Format::R32G32B32_SFLOAT => 12,
            vk::Format::R32G32B32A32_SFLOAT => 16,
            _ => return None,
        };
        Some(size)
    }

    /// 深度格式使用 DEPTH（组合格式再加上 STENCIL），其余使用 COLOR
    pub fn aspect_from_format(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    /// 只有这些 usage 的 image 才允许创建 view
    pub fn usage_allows_view(usage: vk::ImageUsageFlags) -> bool {
        usage.intersects(
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::ImageUsageFlags::INPUT_ATTACHMENT,
        )
    }

    /// mip 数量为 `floor(log2(max(w, h))) + 1`；3D image 不生成 mip
    pub fn mip_levels(extent: vk::Extent3D, mipmapped: bool) -> u32 {
        if !mipmapped || extent.depth != 1 {
            return 1;
        }
        u32::max(extent.width, extent.height).max(1).ilog2() + 1
    }

    /// 第 `level` 级 mip 的尺寸，每个维度最小为 1
    pub fn mip_extent(extent: vk::Extent2D, level: u32) -> vk::Extent2D {
        vk::Extent2D {
            width: (extent.width >> level).max(1),
            height: (extent.height >> level).max(1),
        }
    }
}

/// 由 vma 分配的 image
///
/// usage 允许时自带一个覆盖全部 mip 的 view
///
/// # Destroy
/// 需要手动调用 [`GfxImage::destroy`]
pub struct GfxImage {
    handle: vk::Image,
    allocation: vk_mem::Allocation,
    view: Option<GfxImageView>,

    extent: vk::Extent3D,
    format: vk::Format,
    mip_levels: u32,

    name: String,
}

impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// new & init
impl GfxImage {
    /// 创建 device local 的 image，usage 允许时同时创建 view
    pub fn new(
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        let allocator = Gfx::get().allocator();
        let gfx_device = Gfx::get().gfx_device();

        let mip_levels = VulkanFormatUtils::mip_levels(extent, mipmapped);
        let image_type = if extent.depth != 1 { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            // 这里只能是 UNDEFINED 或者 PREINITIALIZED
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, mut alloc) = unsafe { allocator.create_image(&image_ci, &alloc_ci) }
            .with_context(|| format!("failed to create image {debug_name}"))?;

        let view = if VulkanFormatUtils::usage_allows_view(usage) {
            let view_type = if extent.depth != 1 { vk::ImageViewType::TYPE_3D } else { vk::ImageViewType::TYPE_2D };
            let view_desc = GfxImageViewDesc {
                format,
                view_type,
                aspect_mask: VulkanFormatUtils::aspect_from_format(format),
                mip_levels,
            };
            match GfxImageView::new(image, view_desc, debug_name) {
                Ok(view) => Some(view),
                Err(e) => {
                    unsafe { allocator.destroy_image(image, &mut alloc) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let image = Self {
            handle: image,
            allocation: alloc,
            view,
            extent,
            format,
            mip_levels,
            name: debug_name.to_string(),
        };
        gfx_device.set_debug_name(&image, debug_name);
        Ok(image)
    }

    /// 根据 data 创建 image，并同步等待上传完成
    ///
    /// - `data` 的大小必须等于 `w * h * d * texel size`
    /// - `mipmapped` 时通过 blit 逐级生成 mip
    /// - 上传完成后所有 mip 都处于 SHADER_READ_ONLY_OPTIMAL
    pub fn upload(
        data: &[u8],
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxImage::upload");

        let texel_size = VulkanFormatUtils::texel_size_in_bytes(format)
            .with_context(|| format!("unsupported upload format: {:?}", format))?;
        let expected_size = extent.width as usize * extent.height as usize * extent.depth as usize * texel_size;
        anyhow::ensure!(
            data.len() == expected_size,
            "image {name}: data size {} does not match extent {:?} ({} bytes expected)",
            data.len(),
            extent,
            expected_size
        );

        let mut usage = usage | vk::ImageUsageFlags::TRANSFER_DST;
        if mipmapped {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = Self::new(extent, format, usage, mipmapped, name)?;

        let stage_buffer = match GfxBuffer::new_stage_buffer(data.len() as vk::DeviceSize, format!("{name}-stage")) {
            Ok(buffer) => buffer,
            Err(e) => {
                image.destroy();
                return Err(e);
            }
        };

        let result = stage_buffer.write_by_mmap(data).and_then(|_| {
            Gfx::get().one_time_exec(
                |cmd| {
                    image.record_copy_from_buffer(cmd, &stage_buffer);
                    if image.mip_levels > 1 {
                        image.record_generate_mipmaps(cmd);
                    } else {
                        image.record_to_shader_read(cmd);
                    }
                    Ok(())
                },
                &format!("{name}-upload"),
            )
        });
        stage_buffer.destroy();

        match result {
            Ok(()) => Ok(image),
            Err(e) => {
                image.destroy();
                Err(e)
            }
        }
    }
}

// destroy
impl GfxImage {
    /// 立即销毁，调用者需要保证 GPU 已经不再使用
    pub fn destroy(mut self) {
        log::debug!("destroying GfxImage: {}", self.name);
        if let Some(view) = self.view.take() {
            view.destroy();
        }
        unsafe { Gfx::get().allocator().destroy_image(self.handle, &mut self.allocation) };
        self.handle = vk::Image::null();
    }
}

impl Drop for GfxImage {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxImage {} must be destroyed manually.", self.name);
    }
}

// getter
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// usage 不允许创建 view 时为 None
    #[inline]
    pub fn view(&self) -> Option<&GfxImageView> {
        self.view.as_ref()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

// 录制命令
impl GfxImage {
    fn aspect(&self) -> vk::ImageAspectFlags {
        VulkanFormatUtils::aspect_from_format(self.format)
    }

    /// 所有 mip 转换到 TRANSFER_DST，然后将 buffer 拷贝到 mip 0
    fn record_copy_from_buffer(&self, cmd: &GfxCommandBuffer, stage_buffer: &GfxBuffer) {
        let to_transfer_dst = GfxImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image_aspect_flag(self.aspect());
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_transfer_dst));

        let buffer_image_copy = vk::BufferImageCopy2::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(self.extent)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            });
        cmd.cmd_copy_buffer_to_image(
            &vk::CopyBufferToImageInfo2::default()
                .src_buffer(stage_buffer.vk_buffer())
                .dst_image(self.handle)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(std::slice::from_ref(&buffer_image_copy)),
        );
    }

    /// TRANSFER_DST -> SHADER_READ_ONLY，覆盖所有 mip
    fn record_to_shader_read(&self, cmd: &GfxCommandBuffer) {
        let barrier = GfxImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::SHADER_READ)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_aspect_flag(self.aspect());
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
    }

    /// 逐级 blit 生成 mipmap
    ///
    /// 进入时所有 mip 都处于 TRANSFER_DST，结束时所有 mip 都处于 SHADER_READ_ONLY
    fn record_generate_mipmaps(&self, cmd: &GfxCommandBuffer) {
        let base_extent = vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        };

        for level in 1..self.mip_levels {
            let src_level = level - 1;
            let to_transfer_src = GfxImageBarrier::new()
                .image(self.handle)
                .mip_range(src_level, 1)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .image_aspect_flag(self.aspect());
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_transfer_src));

            let src_extent = VulkanFormatUtils::mip_extent(base_extent, src_level);
            let dst_extent = VulkanFormatUtils::mip_extent(base_extent, level);
            let blit_region = vk::ImageBlit2::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect(),
                    mip_level: src_level,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: src_extent.width as i32,
                        y: src_extent.height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect(),
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst_extent.width as i32,
                        y: dst_extent.height as i32,
                        z: 1,
                    },
                ]);
            cmd.cmd_blit_image(
                &vk::BlitImageInfo2::default()
                    .src_image(self.handle)
                    .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .dst_image(self.handle)
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .regions(std::slice::from_ref(&blit_region))
                    .filter(vk::Filter::LINEAR),
            );

            let to_shader_read = GfxImageBarrier::new()
                .image(self.handle)
                .mip_range(src_level, 1)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .dst_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::SHADER_READ)
                .layout_transfer(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_aspect_flag(self.aspect());
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_shader_read));
        }

        // 最后一级只被写入过
        let last_level = GfxImageBarrier::new()
            .image(self.handle)
            .mip_range(self.mip_levels - 1, 1)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::SHADER_READ)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_aspect_flag(self.aspect());
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&last_level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32, depth: u32) -> vk::Extent3D {
        vk::Extent3D { width, height, depth }
    }

    #[test]
    fn test_mip_levels() {
        assert_eq!(VulkanFormatUtils::mip_levels(extent(1, 1, 1), true), 1);
        assert_eq!(VulkanFormatUtils::mip_levels(extent(16, 16, 1), true), 5);
        assert_eq!(VulkanFormatUtils::mip_levels(extent(1024, 512, 1), true), 11);
        assert_eq!(VulkanFormatUtils::mip_levels(extent(300, 17, 1), true), 9);
        assert_eq!(VulkanFormatUtils::mip_levels(extent(1024, 1024, 1), false), 1);
    }

    #[test]
    fn test_3d_image_never_has_mips() {
        assert_eq!(VulkanFormatUtils::mip_levels(extent(64, 64, 4), true), 1);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let base = vk::Extent2D { width: 16, height: 4 };
        assert_eq!(VulkanFormatUtils::mip_extent(base, 1), vk::Extent2D { width: 8, height: 2 });
        assert_eq!(VulkanFormatUtils::mip_extent(base, 3), vk::Extent2D { width: 2, height: 1 });
        assert_eq!(VulkanFormatUtils::mip_extent(base, 4), vk::Extent2D { width: 1, height: 1 });
    }

    #[test]
    fn test_aspect_from_format() {
        assert_eq!(VulkanFormatUtils::aspect_from_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            VulkanFormatUtils::aspect_from_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(VulkanFormatUtils::aspect_from_format(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(VulkanFormatUtils::aspect_from_format(vk::Format::B8G8R8A8_SRGB), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_view_only_for_viewable_usage() {
        assert!(VulkanFormatUtils::usage_allows_view(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST));
        assert!(VulkanFormatUtils::usage_allows_view(vk::ImageUsageFlags::STORAGE));
        assert!(VulkanFormatUtils::usage_allows_view(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!VulkanFormatUtils::usage_allows_view(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(!VulkanFormatUtils::usage_allows_view(
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
        ));
    }

    #[test]
    fn test_texel_size() {
        assert_eq!(VulkanFormatUtils::texel_size_in_bytes(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(VulkanFormatUtils::texel_size_in_bytes(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(VulkanFormatUtils::texel_size_in_bytes(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(VulkanFormatUtils::texel_size_in_bytes(vk::Format::BC7_UNORM_BLOCK), None);
    }
}
