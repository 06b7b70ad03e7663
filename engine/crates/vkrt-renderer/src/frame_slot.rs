use ash::vk;
use vkrt_gfx::{
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence, semaphore::GfxSemaphore,
    },
    descriptors::{
        descriptor_layout::{GfxDescriptorBindings, GfxDescriptorSetLayout},
        descriptor_pool::{GfxDescriptorPool, GfxDescriptorSet, GfxDescriptorWrite},
    },
    gfx::Gfx,
    raytracing::acceleration::{GfxTlas, TlasBuildMode},
};

use crate::{
    deletion_queue::{DeferredResource, DeletionQueue, probe_readiness},
    pipeline_settings::FrameLabel,
    rt_pass::RtBindings,
    tlas_request::TlasWork,
};

/// 一个 frame in flight 独占的全部资源
///
/// 只有在轮到该 slot 并且等待过它的 fence 之后，才可以修改其中的内容
pub struct FrameSlot {
    label: FrameLabel,

    command_pool: GfxCommandPool,
    command_buffer: GfxCommandBuffer,

    /// 创建时就是 signaled，第一帧的等待不会阻塞
    render_fence: GfxFence,
    /// acquire 完成后 signal，submit 时等待
    acquire_semaphore: GfxSemaphore,

    descriptor_pool: GfxDescriptorPool,
    descriptor_set: GfxDescriptorSet<RtBindings>,

    tlas: Option<GfxTlas>,

    deletion_queue: DeletionQueue<DeferredResource>,
}

// 创建与销毁
impl FrameSlot {
    pub fn new(label: FrameLabel, set_layout: &GfxDescriptorSetLayout<RtBindings>) -> anyhow::Result<Self> {
        let gfx = Gfx::get();

        let command_pool = GfxCommandPool::new(
            gfx.physical_device().gfx_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("frame-{label}"),
        )?;
        let command_buffer = GfxCommandBuffer::new(&command_pool, &format!("frame-{label}-main"))?;

        let render_fence = GfxFence::new(true, &format!("frame-{label}-render"))?;
        let acquire_semaphore = GfxSemaphore::new(&format!("frame-{label}-acquire"))?;

        let descriptor_pool = GfxDescriptorPool::new(
            vk::DescriptorPoolCreateFlags::empty(),
            1,
            &RtBindings::pool_sizes(1),
            &format!("frame-{label}"),
        )?;
        let descriptor_set = descriptor_pool.allocate_set(set_layout, format!("frame-{label}-rt"))?;

        Ok(Self {
            label,
            command_pool,
            command_buffer,
            render_fence,
            acquire_semaphore,
            descriptor_pool,
            descriptor_set,
            tlas: None,
            deletion_queue: DeletionQueue::new(),
        })
    }

    /// 调用者需要保证 device 已经 idle，队列中剩余的条目不再检查 readiness
    pub fn destroy(mut self) {
        let pending = self.deletion_queue.len();
        if pending > 0 {
            log::info!("frame {}: destroying {pending} deferred resources at shutdown", self.label);
        }
        self.deletion_queue.drain_all().for_each(DeferredResource::destroy);

        if let Some(tlas) = self.tlas.take() {
            tlas.destroy();
        }
        // descriptor set 随 pool 一起释放，command buffer 随 pool 一起释放
        self.descriptor_pool.destroy();
        self.command_pool.destroy();
        self.render_fence.destroy();
        self.acquire_semaphore.destroy();
    }
}

// 每帧的流程
impl FrameSlot {
    /// 等待该 slot 上一次提交的工作完成，超时视为错误
    pub fn wait_previous(&self, timeout_ns: u64) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameSlot::wait_previous");
        self.render_fence.wait(timeout_ns)
    }

    /// fence 已经等待过，`Immediate` 的条目都可以销毁
    pub fn flush_deletions(&mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameSlot::flush_deletions");
        let label = self.label;
        let destroyed = self.deletion_queue.flush(probe_readiness, |resource| {
            log::debug!("frame {label}: destroy deferred {}", resource.kind_name());
            resource.destroy();
        })?;
        if destroyed > 0 {
            log::debug!("frame {label}: {destroyed} deferred resources destroyed, {} pending", self.deletion_queue.len());
        }
        Ok(())
    }

    /// 只有在成功 acquire 之后才 reset，被跳过的帧不会让 fence 停留在 unsignaled 状态
    pub fn reset_for_recording(&self) -> anyhow::Result<()> {
        self.render_fence.reset()?;
        self.command_pool.reset_all_buffers()
    }

    /// 将 TLAS 的构建或 refit 录制到本帧的 command buffer 中
    ///
    /// 旧的 TLAS 直接销毁：它最后一次被使用是在该 slot 的上一次提交中，fence 已经等待过
    pub fn record_tlas(&mut self, work: TlasWork<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameSlot::record_tlas");
        let name = format!("frame-{}-tlas", self.label);
        let instance_count = work.instances.len() as u32;
        let existing_count = self.tlas.as_ref().map(GfxTlas::instance_count);

        if TlasBuildMode::choose(work.refit_requested, existing_count, instance_count) == TlasBuildMode::Update {
            if let Some(tlas) = self.tlas.as_mut() {
                return tlas.record_update(&self.command_buffer, work.instances, &name);
            }
        }

        if let Some(old) = self.tlas.take() {
            old.destroy();
        }
        log::debug!("frame {}: build tlas with {instance_count} instances", self.label);
        self.tlas = Some(GfxTlas::record_build(&self.command_buffer, work.instances, &name)?);
        Ok(())
    }

    /// 写入 TLAS 与本帧的 swapchain image view
    pub fn write_descriptors(&self, output_view: vk::ImageView) -> anyhow::Result<()> {
        let tlas = self.tlas.as_ref().map(GfxTlas::handle).ok_or_else(|| {
            anyhow::anyhow!("frame {}: tlas has not been built before descriptor update", self.label)
        })?;
        self.descriptor_set.write(&[
            GfxDescriptorWrite::tlas(RtBindings::TLAS_BINDING, tlas),
            GfxDescriptorWrite::storage_image(RtBindings::OUTPUT_IMAGE_BINDING, output_view, vk::ImageLayout::GENERAL),
        ]);
        Ok(())
    }
}

// getters
impl FrameSlot {
    #[inline]
    pub fn label(&self) -> FrameLabel {
        self.label
    }

    #[inline]
    pub fn command_buffer(&self) -> &GfxCommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn render_fence(&self) -> &GfxFence {
        &self.render_fence
    }

    #[inline]
    pub fn acquire_semaphore(&self) -> &GfxSemaphore {
        &self.acquire_semaphore
    }

    #[inline]
    pub fn descriptor_set(&self) -> &GfxDescriptorSet<RtBindings> {
        &self.descriptor_set
    }

    #[inline]
    pub fn deletion_queue_mut(&mut self) -> &mut DeletionQueue<DeferredResource> {
        &mut self.deletion_queue
    }
}
