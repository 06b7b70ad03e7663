use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// # Destroy
/// 可以 Clone，因此不实现 Drop，需要手动 destroy
#[derive(Clone)]
pub struct GfxFence {
    fence: vk::Fence,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

// 创建与销毁
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(signaled: bool, debug_name: &str) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { gfx_device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None) }
            .with_context(|| format!("vkCreateFence: {debug_name}"))?;

        let fence = Self { fence };
        gfx_device.set_debug_name(&fence, debug_name);
        Ok(fence)
    }

    /// 用于包装从 deletion queue 等地方取回的裸 handle
    #[inline]
    pub fn from_handle(fence: vk::Fence) -> Self {
        Self { fence }
    }

    #[inline]
    pub fn destroy(self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_fence(self.fence, None);
        }
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence，超时视为错误
    ///
    /// timeout: nano seconds
    pub fn wait(&self, timeout_ns: u64) -> anyhow::Result<()> {
        let gfx_device = Gfx::get().gfx_device();
        match unsafe { gfx_device.wait_for_fences(std::slice::from_ref(&self.fence), true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => anyhow::bail!("fence {:?} timed out after {} ns", self.fence, timeout_ns),
            Err(e) => Err(e).context("vkWaitForFences"),
        }
    }

    /// 非阻塞地查询 fence 的状态
    #[inline]
    pub fn is_signaled(&self) -> anyhow::Result<bool> {
        let gfx_device = Gfx::get().gfx_device();
        unsafe { gfx_device.get_fence_status(self.fence) }.context("vkGetFenceStatus")
    }

    #[inline]
    pub fn reset(&self) -> anyhow::Result<()> {
        let gfx_device = Gfx::get().gfx_device();
        unsafe { gfx_device.reset_fences(std::slice::from_ref(&self.fence)) }.context("vkResetFences")
    }
}
