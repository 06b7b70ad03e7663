use std::marker::PhantomData;

use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// 描述一个 descriptor set 中的所有 binding
///
/// 通过类型来区分不同的 layout，descriptor set 只能使用对应类型的 layout 分配
pub trait GfxDescriptorBindings {
    fn bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>>;

    /// 创建 descriptor pool 时，每个 set 需要的各类 descriptor 数量
    fn pool_sizes(set_count: u32) -> Vec<vk::DescriptorPoolSize> {
        Self::bindings()
            .iter()
            .map(|binding| vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: binding.descriptor_count * set_count,
            })
            .collect()
    }
}

/// 描述符集布局
///
/// # Destroy
/// 需要手动调用 [`GfxDescriptorSetLayout::destroy`]
pub struct GfxDescriptorSetLayout<T: GfxDescriptorBindings> {
    handle: vk::DescriptorSetLayout,
    _phantom: PhantomData<T>,
}

impl<T: GfxDescriptorBindings> GfxDescriptorSetLayout<T> {
    pub fn new(flags: vk::DescriptorSetLayoutCreateFlags, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        let bindings = T::bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().flags(flags).bindings(&bindings);

        let gfx_device = Gfx::get().gfx_device();
        let handle = unsafe { gfx_device.create_descriptor_set_layout(&create_info, None) }
            .with_context(|| format!("vkCreateDescriptorSetLayout: {}", debug_name.as_ref()))?;
        let layout = Self {
            handle,
            _phantom: PhantomData,
        };
        gfx_device.set_debug_name(&layout, debug_name);
        Ok(layout)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_descriptor_set_layout(self.handle, None);
        }
        self.handle = vk::DescriptorSetLayout::null();
    }
}

impl<T: GfxDescriptorBindings> Drop for GfxDescriptorSetLayout<T> {
    fn drop(&mut self) {
        debug_assert!(
            self.handle == vk::DescriptorSetLayout::null(),
            "GfxDescriptorSetLayout must be destroyed manually."
        );
    }
}

impl<T: GfxDescriptorBindings> DebugType for GfxDescriptorSetLayout<T> {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorSetLayout"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TwoImages;
    impl GfxDescriptorBindings for TwoImages {
        fn bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
            vec![
                vk::DescriptorSetLayoutBinding::default()
                    .binding(0)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .descriptor_count(1),
                vk::DescriptorSetLayoutBinding::default()
                    .binding(1)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .descriptor_count(4),
            ]
        }
    }

    #[test]
    fn test_pool_sizes_scale_with_set_count() {
        let sizes = TwoImages::pool_sizes(2);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert_eq!(sizes[1].descriptor_count, 8);
    }
}
