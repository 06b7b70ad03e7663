use std::ffi::CString;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{fence::GfxFence, submit_info::GfxSubmitInfo},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

#[derive(Clone, Debug)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// present 调用的结果
///
/// OUT_OF_DATE 不是错误，而是需要重建 swapchain 的信号
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// # destroy
///
/// queue 会随着 device 的销毁而销毁
pub struct GfxCommandQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: GfxQueueFamily,
}

impl DebugType for GfxCommandQueue {
    fn debug_type_name() -> &'static str {
        "GfxCommandQueue"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_queue
    }
}

// getter
impl GfxCommandQueue {
    #[inline]
    pub fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.vk_queue
    }
}

// tools
impl GfxCommandQueue {
    pub fn submit(&self, batches: Vec<GfxSubmitInfo>, fence: Option<&GfxFence>) -> anyhow::Result<()> {
        // submit_infos 引用了 batches 中的内存
        let submit_infos = batches.iter().map(|b| b.submit_info()).collect_vec();
        unsafe {
            Gfx::get().gfx_device().queue_submit2(
                self.vk_queue,
                &submit_infos,
                fence.map_or(vk::Fence::null(), |f| f.handle()),
            )
        }
        .context("vkQueueSubmit2")
    }

    /// 借助 VK_EXT_swapchain_maintenance1，在 present 完成后 signal `present_fence`，
    /// 从而知道 present 引用的 semaphore 与 swapchain 何时可以销毁
    pub fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
        present_fence: vk::Fence,
    ) -> anyhow::Result<PresentOutcome> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_fences = [present_fence];

        let mut present_fence_info = vk::SwapchainPresentFenceInfoEXT::default().fences(&present_fences);
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices)
            .push_next(&mut present_fence_info);

        match unsafe { Gfx::get().gfx_device().swapchain.queue_present(self.vk_queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).context("vkQueuePresentKHR"),
        }
    }

    /// 根据 specification，vkQueueWaitIdle 应该和 Fence 效率相同
    #[inline]
    pub fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { Gfx::get().gfx_device().queue_wait_idle(self.vk_queue) }.context("vkQueueWaitIdle")
    }
}

// debug 相关命令
impl GfxCommandQueue {
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = CString::new(label_name).unwrap_or_default();
        unsafe {
            Gfx::get().gfx_device().debug_utils.queue_begin_debug_utils_label(
                self.vk_queue,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    #[inline]
    pub fn end_label(&self) {
        unsafe {
            Gfx::get().gfx_device().debug_utils.queue_end_debug_utils_label(self.vk_queue);
        }
    }
}
