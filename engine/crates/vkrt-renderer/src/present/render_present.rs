use anyhow::Context;
use ash::vk;
use vkrt_gfx::{
    commands::{command_queue::PresentOutcome, semaphore::GfxSemaphore},
    gfx::Gfx,
    swapchain::render_swapchain::{AcquireOutcome, GfxRenderSwapchain},
};

use crate::{
    deletion_queue::{DeferredResource, DeletionQueue, Readiness},
    pipeline_settings::DefaultRendererSettings,
    present::present_fence_pool::PresentFencePool,
};

/// 旧的 swapchain 资源应当如何销毁
///
/// 还没有任何 present 时，present engine 不会引用旧资源，可以立即销毁
pub fn retirement_readiness(latest_present_fence: Option<vk::Fence>) -> Option<Readiness> {
    latest_present_fence.map(Readiness::FenceSignaled)
}

/// 向窗口呈现的部分：swapchain 资源、present fence 池，以及待处理的 resize 请求
pub struct RenderPresent {
    swapchain: GfxRenderSwapchain,
    present_fences: PresentFencePool,

    /// 窗口尺寸变化，或 acquire/present 返回 OUT_OF_DATE 时设置，在下一次 update 中处理
    resize_pending: bool,

    frame_timeout_ns: u64,
}

// new & init
impl RenderPresent {
    pub fn new(framebuffer_extent: [u32; 2], max_present_fences: usize, frame_timeout_ns: u64) -> anyhow::Result<Self> {
        let swapchain =
            GfxRenderSwapchain::new(&DefaultRendererSettings::swapchain_settings(), framebuffer_extent, None)
                .context("failed to create the initial swapchain")?;

        Ok(Self {
            swapchain,
            present_fences: PresentFencePool::new(max_present_fences),
            resize_pending: false,
            frame_timeout_ns,
        })
    }

    /// 调用者需要保证 device 已经 idle
    pub fn destroy(self) {
        self.swapchain.destroy();
        self.present_fences.destroy();
    }
}

// update
impl RenderPresent {
    #[inline]
    pub fn request_resize(&mut self) {
        self.resize_pending = true;
    }

    /// 非阻塞的 swapchain 重建
    ///
    /// 以当前 swapchain 作为 old swapchain 创建新的一组资源。旧的资源与最近一次 present 的 fence
    /// 一起放入 `deletion_queue`，等该 fence signaled 之后再销毁；池中对应的位置换成新的 signaled fence
    pub fn rebuild_after_resized(
        &mut self,
        framebuffer_extent: [u32; 2],
        deletion_queue: &mut DeletionQueue<DeferredResource>,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("RenderPresent::rebuild_after_resized");

        let new_swapchain = GfxRenderSwapchain::new(
            &DefaultRendererSettings::swapchain_settings(),
            framebuffer_extent,
            Some(&self.swapchain),
        )
        .context("failed to recreate swapchain")?;

        let latest_fence = match self.present_fences.take_latest() {
            Ok(fence) => fence,
            Err(e) => {
                new_swapchain.destroy();
                return Err(e);
            }
        };

        let old_swapchain = std::mem::replace(&mut self.swapchain, new_swapchain);

        match retirement_readiness(latest_fence.as_ref().map(|f| f.handle())) {
            Some(readiness) => {
                log::info!("retire swapchain {:?}, gated on {:?}", old_swapchain.handle(), readiness);
                deletion_queue.push(
                    DeferredResource::Swapchain {
                        swapchain: old_swapchain,
                        present_fence: latest_fence,
                    },
                    readiness,
                );
            }
            None => {
                log::info!("resize before the first present, destroying swapchain immediately");
                old_swapchain.destroy();
            }
        }

        self.resize_pending = false;
        Ok(())
    }

    /// OUT_OF_DATE 会记录 resize 请求，由调用者跳过本帧
    pub fn acquire_image(&mut self, semaphore: &GfxSemaphore, timeout_ns: u64) -> anyhow::Result<AcquireOutcome> {
        let _span = tracy_client::span!("RenderPresent::acquire_image");

        let outcome = self.swapchain.acquire_next_image(semaphore, timeout_ns)?;
        match outcome {
            AcquireOutcome::OutOfDate => {
                log::info!("acquire: swapchain out of date");
                self.resize_pending = true;
            }
            AcquireOutcome::Acquired { suboptimal: true, .. } => {
                log::debug!("acquire: swapchain suboptimal");
            }
            AcquireOutcome::Acquired { .. } => {}
        }
        Ok(outcome)
    }

    /// 等待 image 对应的 present semaphore，并附带一个来自池中的 present fence
    pub fn present_image(&mut self, image_index: u32) -> anyhow::Result<PresentOutcome> {
        let _span = tracy_client::span!("RenderPresent::present_image");

        let present_fence = self.present_fences.acquire(self.frame_timeout_ns)?;
        let outcome = self.swapchain.present_image(Gfx::get().present_queue(), image_index, present_fence)?;
        match outcome {
            PresentOutcome::OutOfDate => {
                log::info!("present: swapchain out of date");
                self.resize_pending = true;
            }
            PresentOutcome::Suboptimal => log::debug!("present: swapchain suboptimal"),
            PresentOutcome::Presented => {}
        }
        Ok(outcome)
    }
}

// getters
impl RenderPresent {
    #[inline]
    pub fn swapchain(&self) -> &GfxRenderSwapchain {
        &self.swapchain
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_retirement_before_first_present_is_immediate() {
        assert_eq!(retirement_readiness(None), None);
    }

    #[test]
    fn test_retirement_is_gated_on_latest_present_fence() {
        let fence = vk::Fence::from_raw(0x42);
        assert_eq!(retirement_readiness(Some(fence)), Some(Readiness::FenceSignaled(fence)));
    }
}
