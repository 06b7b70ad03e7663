use std::ops::Deref;

use anyhow::Context;
use ash::vk;

/// vma 分配器
///
/// 开启了 BUFFER_DEVICE_ADDRESS，加速结构、SBT 以及 mesh buffer 都需要 device address
pub struct GfxMemAllocator {
    inner: vk_mem::Allocator,
}

impl GfxMemAllocator {
    /// vma 需要引用 Instance 以及 Device，因此需要在 [`crate::gfx_core::GfxCore`] 初始化完成后再创建，
    /// 并且要在 Device 销毁之前 drop
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> anyhow::Result<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;

        let vma = unsafe { vk_mem::Allocator::new(vma_ci) }.context("failed to create vma allocator")?;

        Ok(Self { inner: vma })
    }
}

impl Deref for GfxMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
