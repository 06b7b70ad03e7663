use std::marker::PhantomData;

use anyhow::Context;
use ash::vk;

use crate::{
    descriptors::descriptor_layout::{GfxDescriptorBindings, GfxDescriptorSetLayout},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

/// 描述符池
///
/// 每个 frame slot 独占一个，只会在该 slot 的回合中被访问
///
/// # Destroy
/// 需要手动调用 [`GfxDescriptorPool::destroy`]，从中分配的 descriptor set 随之一起释放
pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
    name: String,
}

impl DebugType for GfxDescriptorPool {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// 创建与销毁
impl GfxDescriptorPool {
    /// - max_sets: 最大描述符集数量
    /// - pool_sizes: 每种类型描述符的最大数量
    pub fn new(
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        name: &str,
    ) -> anyhow::Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default().flags(flags).max_sets(max_sets).pool_sizes(pool_sizes);

        let gfx_device = Gfx::get().gfx_device();
        let handle = unsafe { gfx_device.create_descriptor_pool(&create_info, None) }
            .with_context(|| format!("vkCreateDescriptorPool: {name}"))?;
        let pool = Self {
            handle,
            name: name.to_string(),
        };
        gfx_device.set_debug_name(&pool, name);
        Ok(pool)
    }

    pub fn destroy(mut self) {
        log::debug!("destroying GfxDescriptorPool: {}", self.name);
        unsafe { Gfx::get().gfx_device().destroy_descriptor_pool(self.handle, None) };
        self.handle = vk::DescriptorPool::null();
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    pub fn allocate_set<T: GfxDescriptorBindings>(
        &self,
        layout: &GfxDescriptorSetLayout<T>,
        debug_name: impl AsRef<str>,
    ) -> anyhow::Result<GfxDescriptorSet<T>> {
        let set_layouts = [layout.handle()];
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.handle).set_layouts(&set_layouts);

        let gfx_device = Gfx::get().gfx_device();
        let sets = unsafe { gfx_device.allocate_descriptor_sets(&alloc_info) }
            .with_context(|| format!("vkAllocateDescriptorSets: {}", debug_name.as_ref()))?;
        let set = GfxDescriptorSet {
            handle: sets[0],
            _phantom: PhantomData,
        };
        gfx_device.set_debug_name(&set, debug_name);
        Ok(set)
    }
}

impl Drop for GfxDescriptorPool {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::DescriptorPool::null(), "GfxDescriptorPool must be destroyed manually.");
    }
}

/// 描述符集
///
/// # Destroy
/// 跟随 descriptor pool 一起销毁
pub struct GfxDescriptorSet<T: GfxDescriptorBindings> {
    handle: vk::DescriptorSet,
    _phantom: PhantomData<T>,
}

impl<T: GfxDescriptorBindings> GfxDescriptorSet<T> {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// 立即更新，调用者需要保证该 set 没有被执行中的 command buffer 使用
    pub fn write(&self, writes: &[GfxDescriptorWrite]) {
        let mut as_infos = writes
            .iter()
            .map(|write| match write {
                GfxDescriptorWrite::AccelerationStructure { tlas, .. } => {
                    Some(vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(tlas))
                }
                _ => None,
            })
            .collect::<Vec<_>>();

        let vk_writes = writes
            .iter()
            .zip(as_infos.iter_mut())
            .map(|(write, as_info)| {
                let vk_write = vk::WriteDescriptorSet::default().dst_set(self.handle).dst_array_element(0);
                match (write, as_info) {
                    (GfxDescriptorWrite::AccelerationStructure { binding, tlas }, Some(as_info)) => vk_write
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                        // 加速结构的数量不会从 p_next 中推断
                        .descriptor_count(tlas.len() as u32)
                        .push_next(as_info),
                    (GfxDescriptorWrite::StorageImage { binding, image_info }, _) => vk_write
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                        .image_info(std::slice::from_ref(image_info)),
                    (GfxDescriptorWrite::AccelerationStructure { binding, .. }, None) => {
                        unreachable!("missing acceleration structure info for binding {binding}")
                    }
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            Gfx::get().gfx_device().update_descriptor_sets(&vk_writes, &[]);
        }
    }
}

impl<T: GfxDescriptorBindings> DebugType for GfxDescriptorSet<T> {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorSet"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// 一次 descriptor 更新
pub enum GfxDescriptorWrite {
    AccelerationStructure {
        binding: u32,
        tlas: [vk::AccelerationStructureKHR; 1],
    },
    StorageImage {
        binding: u32,
        image_info: vk::DescriptorImageInfo,
    },
}

impl GfxDescriptorWrite {
    #[inline]
    pub fn tlas(binding: u32, tlas: vk::AccelerationStructureKHR) -> Self {
        Self::AccelerationStructure { binding, tlas: [tlas] }
    }

    #[inline]
    pub fn storage_image(binding: u32, image_view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self::StorageImage {
            binding,
            image_info: vk::DescriptorImageInfo::default().image_view(image_view).image_layout(layout),
        }
    }
}
