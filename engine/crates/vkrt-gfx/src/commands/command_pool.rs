use anyhow::Context;
use ash::vk;

use crate::{
    commands::command_queue::GfxQueueFamily,
    foundation::{debug_messenger::DebugType, device::GfxDevice},
    gfx::Gfx,
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    queue_family_index: u32,

    debug_name: String,
    valid: bool,
}

// init & destory
impl GfxCommandPool {
    #[inline]
    pub fn new(queue_family: &GfxQueueFamily, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> anyhow::Result<Self> {
        Self::new_internal(Gfx::get().gfx_device(), queue_family, flags, debug_name)
    }

    /// [`Gfx`] 单例初始化的过程中还无法使用 `Gfx::get()`，因此需要显式传入 device
    pub(crate) fn new_internal(
        gfx_device: &GfxDevice,
        queue_family: &GfxQueueFamily,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        let pool = unsafe {
            gfx_device.create_command_pool(
                &vk::CommandPoolCreateInfo::default().queue_family_index(queue_family.queue_family_index).flags(flags),
                None,
            )
        }
        .with_context(|| format!("vkCreateCommandPool: {debug_name}"))?;

        let command_pool = Self {
            handle: pool,
            queue_family_index: queue_family.queue_family_index,
            debug_name: debug_name.to_string(),
            valid: true,
        };
        gfx_device.set_debug_name(&command_pool, debug_name);
        Ok(command_pool)
    }

    pub fn destroy(self) {
        self.destroy_internal(Gfx::get().gfx_device());
    }

    pub(crate) fn destroy_internal(mut self, gfx_device: &GfxDevice) {
        unsafe {
            gfx_device.destroy_command_pool(self.handle, None);
        }
        self.valid = false;
    }
}

// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

// tools
impl GfxCommandPool {
    /// 这个调用并不会释放 command buffer，而是将 pool 内的 command buffer 设置到初始状态
    ///
    /// reset 之后，pool 内的 command buffer 又可以重新录制命令
    pub fn reset_all_buffers(&self) -> anyhow::Result<()> {
        unsafe { Gfx::get().gfx_device().reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty()) }
            .with_context(|| format!("vkResetCommandPool: {}", self.debug_name))
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        assert!(!self.valid, "GfxCommandPool {} must be destroyed manually.", self.debug_name);
    }
}
