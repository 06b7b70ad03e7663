use anyhow::Context;
use ash::vk;
use ash::vk::Handle;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageViewDesc {
    /// format 可以基于 vk::Image 重解释
    pub format: vk::Format,
    pub view_type: vk::ImageViewType,
    pub aspect_mask: vk::ImageAspectFlags,
    /// 从 0 开始的 mip level 数量
    pub mip_levels: u32,
}

impl GfxImageViewDesc {
    pub fn new_2d(format: vk::Format, aspect: vk::ImageAspectFlags, mip_levels: u32) -> Self {
        Self {
            format,
            view_type: vk::ImageViewType::TYPE_2D,
            aspect_mask: aspect,
            mip_levels,
        }
    }
}

pub struct GfxImageView {
    handle: vk::ImageView,
    desc: GfxImageViewDesc,
    name: String,
}

impl DebugType for GfxImageView {
    fn debug_type_name() -> &'static str {
        "GfxImageView"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// new & init
impl GfxImageView {
    pub fn new(image: vk::Image, desc: GfxImageViewDesc, name: impl AsRef<str>) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();

        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect_mask,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let handle = unsafe { gfx_device.create_image_view(&info, None) }
            .with_context(|| format!("vkCreateImageView: {}", name.as_ref()))?;
        let image_view = Self {
            handle,
            desc,
            name: name.as_ref().to_string(),
        };
        gfx_device.set_debug_name(&image_view, &image_view.name);
        Ok(image_view)
    }

    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_image_view(self.handle, None);
        }
        self.handle = vk::ImageView::null();
    }
}

impl Drop for GfxImageView {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxImageView {} must be destroyed manually.", self.name);
    }
}

// getters
impl GfxImageView {
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxImageViewDesc {
        &self.desc
    }
}

impl std::fmt::Display for GfxImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GfxImageView({}, {:?})", self.name, self.handle)
    }
}
