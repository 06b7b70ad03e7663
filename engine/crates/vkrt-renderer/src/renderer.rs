use anyhow::Context;
use ash::vk;
use glam::Mat4;
use vkrt_asset::vertex::Vertex;
use vkrt_crate_tools::config::RendererConfig;
use vkrt_gfx::{
    commands::{barrier::GfxImageBarrier, submit_info::GfxSubmitInfo},
    gfx::Gfx,
    raytracing::acceleration::{BlasInstance, GfxAcceleration},
    resources::{buffer::GfxBuffer, image::GfxImage},
    swapchain::render_swapchain::{AcquireOutcome, GfxRenderSwapchain},
};
use vkrt_platform::render_window::RenderWindow;

use crate::{
    camera::RtCamera,
    default_textures::DefaultTextures,
    deletion_queue::{DeferredResource, Readiness},
    frame_counter::FrameCounter,
    frame_schedule::{FrameOutcome, FrameSchedule, FrameSteps},
    frame_slot::FrameSlot,
    gpu_mesh::GpuMeshBuffers,
    pipeline_settings::FrameLabel,
    present::render_present::RenderPresent,
    rt_pass::RtPass,
    tlas_request::TlasWork,
};

/// 渲染器
///
/// 持有 N 个 frame slot，每次 [`Renderer::update`] 驱动当前 slot 走完一帧：
/// 等待 -> 延迟销毁 -> resize -> acquire -> 录制 -> 提交 -> present
pub struct Renderer {
    schedule: FrameSchedule,
    frame_slots: [FrameSlot; FrameCounter::fif_count()],

    render_present: RenderPresent,
    rt_pass: RtPass,

    camera: RtCamera,

    default_textures: Option<DefaultTextures>,

    frame_timeout_ns: u64,
}

// 手动 drop
impl Renderer {
    /// 等待 GPU 空闲之后依次销毁所有资源，最后销毁 Gfx 单例
    pub fn destroy(mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Renderer::destroy");

        // 在完全销毁之前，等待 GPU 上所有的工作都完成，包括仍在进行的 present
        let idle = Gfx::get().wait_idle().context("wait idle before renderer destroy");
        if let Err(e) = &idle {
            log::error!("{e:?}, destroying renderer anyway");
        }

        if let Some(default_textures) = self.default_textures.take() {
            let label = self.schedule.deletion_target();
            default_textures.retire(self.frame_slots[*label].deletion_queue_mut());
        }
        for slot in self.frame_slots {
            slot.destroy();
        }
        self.rt_pass.destroy();
        self.render_present.destroy();

        Gfx::destroy();
        log::info!("renderer destroyed");
        idle
    }
}

// init
impl Renderer {
    /// 首先初始化 Gfx 单例，之后的所有资源都依赖它
    pub fn new(window: &impl RenderWindow, config: &RendererConfig) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Renderer::new");

        Gfx::init(&config.app_name, window, config.enable_validation, config.immediate_timeout_ns)?;
        match Self::create_parts(window.framebuffer_extent(), config) {
            Ok(renderer) => {
                log::info!(
                    "renderer created: {} frames in flight, swapchain {:?}",
                    FrameCounter::fif_count(),
                    renderer.render_present.swapchain().extent()
                );
                Ok(renderer)
            }
            Err(e) => {
                Gfx::destroy();
                Err(e)
            }
        }
    }

    fn create_parts(framebuffer_extent: [u32; 2], config: &RendererConfig) -> anyhow::Result<Self> {
        let rt_pass = RtPass::new(&config.shader_dir)
            .with_context(|| format!("failed to create ray tracing pass from {}", config.shader_dir.display()))?;

        let frame_slots = match Self::create_frame_slots(&rt_pass) {
            Ok(slots) => slots,
            Err(e) => {
                rt_pass.destroy();
                return Err(e);
            }
        };

        let render_present =
            match RenderPresent::new(framebuffer_extent, config.max_present_fences, config.frame_timeout_ns) {
                Ok(present) => present,
                Err(e) => {
                    frame_slots.into_iter().for_each(FrameSlot::destroy);
                    rt_pass.destroy();
                    return Err(e);
                }
            };

        let default_textures = match DefaultTextures::new() {
            Ok(textures) => textures,
            Err(e) => {
                render_present.destroy();
                frame_slots.into_iter().for_each(FrameSlot::destroy);
                rt_pass.destroy();
                return Err(e);
            }
        };

        Ok(Self {
            schedule: FrameSchedule::new(),
            frame_slots,
            render_present,
            rt_pass,
            camera: RtCamera::new(framebuffer_extent),
            default_textures: Some(default_textures),
            frame_timeout_ns: config.frame_timeout_ns,
        })
    }

    fn create_frame_slots(rt_pass: &RtPass) -> anyhow::Result<[FrameSlot; FrameCounter::fif_count()]> {
        let mut slots = Vec::with_capacity(FrameCounter::fif_count());
        for label in FrameCounter::frame_labels() {
            match FrameSlot::new(label, rt_pass.set_layout()) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    slots.into_iter().for_each(FrameSlot::destroy);
                    return Err(e);
                }
            }
        }
        array_init::from_iter(slots).context("frame slot count mismatch")
    }
}

// phase call
impl Renderer {
    /// 驱动一帧
    ///
    /// acquire 返回 OUT_OF_DATE，或者窗口、surface 的尺寸为 0 时跳过本帧，不提交任何工作
    pub fn update(&mut self, window: &impl RenderWindow) -> anyhow::Result<FrameOutcome> {
        let _span = tracy_client::span!("Renderer::update");

        let mut steps = RendererFrameSteps {
            window,
            frame_slots: &mut self.frame_slots,
            render_present: &mut self.render_present,
            rt_pass: &self.rt_pass,
            camera: &self.camera,
            frame_timeout_ns: self.frame_timeout_ns,
        };
        let outcome = self.schedule.run_frame(&mut steps)?;
        if outcome == FrameOutcome::Presented {
            tracy_client::frame_mark();
        }
        Ok(outcome)
    }
}

/// 一次 update 期间对渲染器各部分的借用
struct RendererFrameSteps<'a, W: RenderWindow> {
    window: &'a W,
    frame_slots: &'a mut [FrameSlot; FrameCounter::fif_count()],
    render_present: &'a mut RenderPresent,
    rt_pass: &'a RtPass,
    camera: &'a RtCamera,
    frame_timeout_ns: u64,
}

impl<W: RenderWindow> FrameSteps for RendererFrameSteps<'_, W> {
    fn wait_previous(&mut self, label: FrameLabel) -> anyhow::Result<()> {
        self.frame_slots[*label].wait_previous(self.frame_timeout_ns)
    }

    fn flush_deletions(&mut self, label: FrameLabel) -> anyhow::Result<()> {
        self.frame_slots[*label].flush_deletions()
    }

    fn poll_resize(&mut self) -> bool {
        if self.window.take_resized() {
            self.render_present.request_resize();
        }
        self.render_present.resize_pending()
    }

    fn window_extent(&self) -> [u32; 2] {
        self.window.framebuffer_extent()
    }

    fn surface_extent(&self, window_extent: [u32; 2]) -> anyhow::Result<vk::Extent2D> {
        GfxRenderSwapchain::surface_extent(window_extent)
    }

    fn rebuild_swapchain(&mut self, label: FrameLabel, extent: [u32; 2]) -> anyhow::Result<()> {
        self.render_present.rebuild_after_resized(extent, self.frame_slots[*label].deletion_queue_mut())
    }

    fn acquire_image(&mut self, label: FrameLabel) -> anyhow::Result<AcquireOutcome> {
        self.render_present.acquire_image(self.frame_slots[*label].acquire_semaphore(), self.frame_timeout_ns)
    }

    fn record_and_submit(
        &mut self,
        label: FrameLabel,
        image_index: u32,
        tlas_work: Option<TlasWork<'_>>,
    ) -> anyhow::Result<()> {
        self.record_frame(label, image_index, tlas_work)?;
        self.submit_frame(label, image_index)
    }

    fn present_image(&mut self, image_index: u32) -> anyhow::Result<()> {
        self.render_present.present_image(image_index)?;
        Ok(())
    }
}

// tools
impl<W: RenderWindow> RendererFrameSteps<'_, W> {
    fn record_frame(
        &mut self,
        label: FrameLabel,
        image_index: u32,
        tlas_work: Option<TlasWork<'_>>,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Renderer::record_frame");
        let slot = &mut self.frame_slots[*label];

        // 只有 acquire 成功之后才会 reset fence
        slot.reset_for_recording()?;
        slot.command_buffer().begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &format!("frame-{label}"))?;

        if let Some(work) = tlas_work {
            slot.record_tlas(work)?;
        }

        let swapchain = self.render_present.swapchain();
        let image = swapchain.image(image_index);
        slot.write_descriptors(swapchain.image_view(image_index).handle())?;

        let cmd = slot.command_buffer();
        // acquire semaphore 在 TOP_OF_PIPE 等待，即等价于 ALL_COMMANDS
        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxImageBarrier::new()
                .image(image)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
                .src_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::empty())
                .dst_mask(
                    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    vk::AccessFlags2::SHADER_STORAGE_WRITE,
                )],
        );

        self.rt_pass.record(cmd, slot.descriptor_set(), self.camera.push_constants(), swapchain.extent());

        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxImageBarrier::new()
                .image(image)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .layout_transfer(vk::ImageLayout::GENERAL, vk::ImageLayout::PRESENT_SRC_KHR)
                .src_mask(
                    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    vk::AccessFlags2::SHADER_STORAGE_WRITE,
                )
                .dst_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::empty())],
        );

        cmd.end()
    }

    fn submit_frame(&self, label: FrameLabel, image_index: u32) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Renderer::submit_frame");
        let slot = &self.frame_slots[*label];
        let present_semaphore = self.render_present.swapchain().present_semaphore(image_index);

        Gfx::get().gfx_queue().submit(
            vec![
                GfxSubmitInfo::new(std::slice::from_ref(slot.command_buffer()))
                    .wait(slot.acquire_semaphore(), vk::PipelineStageFlags2::TOP_OF_PIPE)
                    .signal(present_semaphore, vk::PipelineStageFlags2::ALL_COMMANDS),
            ],
            Some(slot.render_fence()),
        )
    }
}

// 资源创建
impl Renderer {
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        alloc_flags: vk_mem::AllocationCreateFlags,
        mem_usage: vk_mem::MemoryUsage,
        name: &str,
    ) -> anyhow::Result<GfxBuffer> {
        GfxBuffer::new(size, usage, alloc_flags, mem_usage, name)
    }

    /// device local 的 image，内容未初始化，layout 为 UNDEFINED
    pub fn create_image(
        &self,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> anyhow::Result<GfxImage> {
        GfxImage::new(extent, format, usage, mipmapped, name)
    }

    /// 创建 device local 的 vertex / index buffer，并同步上传数据
    pub fn upload_mesh(&self, vertices: &[Vertex], indices: &[u32], name: &str) -> anyhow::Result<GpuMeshBuffers> {
        let _span = tracy_client::span!("Renderer::upload_mesh");
        anyhow::ensure!(!vertices.is_empty(), "mesh {name} has no vertices");
        anyhow::ensure!(!indices.is_empty(), "mesh {name} has no indices");

        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::TRANSFER_DST;

        let vertex_buffer = self.create_buffer(
            size_of_val(vertices) as vk::DeviceSize,
            usage,
            vk_mem::AllocationCreateFlags::empty(),
            vk_mem::MemoryUsage::AutoPreferDevice,
            &format!("{name}-vertex"),
        )?;
        let index_buffer = match self.create_buffer(
            size_of_val(indices) as vk::DeviceSize,
            usage,
            vk_mem::AllocationCreateFlags::empty(),
            vk_mem::MemoryUsage::AutoPreferDevice,
            &format!("{name}-index"),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                vertex_buffer.destroy();
                return Err(e);
            }
        };

        let uploaded = vertex_buffer.transfer_data_sync(vertices).and_then(|_| index_buffer.transfer_data_sync(indices));
        if let Err(e) = uploaded {
            vertex_buffer.destroy();
            index_buffer.destroy();
            return Err(e).with_context(|| format!("failed to upload mesh {name}"));
        }

        Ok(GpuMeshBuffers {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    /// 同步构建 BLAS
    pub fn create_blas(&self, mesh: &GpuMeshBuffers, name: &str) -> anyhow::Result<GfxAcceleration> {
        GfxAcceleration::build_blas_sync(&mesh.blas_geometry(), name)
    }

    /// 同步上传 image，`mipmapped` 时通过 blit 生成所有 mip
    pub fn upload_image(
        &self,
        data: &[u8],
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> anyhow::Result<GfxImage> {
        GfxImage::upload(data, extent, format, usage, mipmapped, name)
    }
}

// 延迟销毁
//
// 资源可能被最近一次提交的帧引用，因此放入该帧的 slot：等下一次轮到它并等待过 fence 后，资源就可以销毁
impl Renderer {
    fn enqueue_destruction(&mut self, resource: DeferredResource) {
        let label = self.schedule.deletion_target();
        log::debug!("enqueue {} destruction into frame {label}", resource.kind_name());
        self.frame_slots[*label].deletion_queue_mut().push(resource, Readiness::Immediate);
    }

    pub fn enqueue_buffer_destruction(&mut self, buffer: GfxBuffer) {
        self.enqueue_destruction(DeferredResource::Buffer(buffer));
    }

    pub fn enqueue_image_destruction(&mut self, image: GfxImage) {
        self.enqueue_destruction(DeferredResource::Image(image));
    }

    pub fn enqueue_blas_destruction(&mut self, blas: GfxAcceleration) {
        self.enqueue_destruction(DeferredResource::Blas(blas));
    }

    /// vertex buffer 与 index buffer 一起销毁
    pub fn enqueue_mesh_destruction(&mut self, mesh: GpuMeshBuffers) {
        self.enqueue_destruction(DeferredResource::MeshBuffers(mesh));
    }
}

// 场景
impl Renderer {
    /// 接下来的 N 帧中，每个 slot 都会用 `instances` 完整地重建一次 TLAS
    pub fn set_tlas_build(&mut self, instances: Vec<BlasInstance>) {
        self.schedule.set_tlas_build(instances);
    }

    /// 与 [`Renderer::set_tlas_build`] 相同，但在 instance 数量不变时进行原地 refit
    pub fn set_tlas_update(&mut self, instances: Vec<BlasInstance>) {
        self.schedule.set_tlas_update(instances);
    }

    pub fn set_view_matrix(&mut self, view: Mat4) {
        self.camera.set_view_matrix(view);
    }

    pub fn set_projection_matrix(&mut self, projection: Mat4) {
        self.camera.set_projection_matrix(projection);
    }
}

// getter
impl Renderer {
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        self.schedule.frame_counter()
    }

    #[inline]
    pub fn camera(&self) -> &RtCamera {
        &self.camera
    }

    #[inline]
    pub fn default_textures(&self) -> Option<&DefaultTextures> {
        self.default_textures.as_ref()
    }
}
