use anyhow::Context;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::{
    basic::color::LabelColor,
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, command_queue::GfxCommandQueue,
        fence::GfxFence, submit_info::GfxSubmitInfo,
    },
    foundation::{
        device::GfxDevice, instance::GfxInstance, mem_allocator::GfxMemAllocator, physical_device::GfxPhysicalDevice,
    },
    gfx_core::GfxCore,
    swapchain::surface::GfxSurface,
};

/// Vulkan 图形上下文单例
///
/// 管理所有 Vulkan 核心资源，包括实例、设备、队列、内存分配器等。
/// 采用单例模式简化参数传递和生命周期管理，仅适用于单线程环境。
///
/// # 初始化流程
/// ```ignore
/// Gfx::init("MyApp", &window, true, 10_000_000_000)?;
/// let device = Gfx::get().gfx_device();
/// // 使用...
/// Gfx::destroy();
/// ```
pub struct Gfx {
    pub(crate) gfx_core: GfxCore,
    /// 需要在 device 销毁之前 drop，因此使用 Option
    pub(crate) allocator: Option<GfxMemAllocator>,

    /// 一次性提交所使用的 command pool
    pub(crate) temp_graphics_command_pool: GfxCommandPool,

    /// 一次性提交的等待超时（纳秒）
    pub(crate) immediate_timeout_ns: u64,
}

// 创建与销毁
impl Gfx {
    const ENGINE_NAME: &'static str = "vkrt";

    fn new(
        app_name: &str,
        window: &(impl HasDisplayHandle + HasWindowHandle),
        enable_validation: bool,
        immediate_timeout_ns: u64,
    ) -> anyhow::Result<Self> {
        let gfx_core = GfxCore::new(app_name, Self::ENGINE_NAME, window, enable_validation)?;

        // 单例还没有初始化，需要显式传入 device
        let temp_graphics_command_pool = GfxCommandPool::new_internal(
            &gfx_core.gfx_device,
            &gfx_core.physical_device.gfx_queue_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
            "gfx-one-time",
        )?;

        let allocator = GfxMemAllocator::new(
            &gfx_core.instance.ash_instance,
            gfx_core.physical_device.vk_handle,
            &gfx_core.gfx_device,
        )?;

        Ok(Self {
            gfx_core,
            allocator: Some(allocator),
            temp_graphics_command_pool,
            immediate_timeout_ns,
        })
    }
}

// 注意：此静态变量仅用于单线程环境
static mut G_GFX: Option<Gfx> = None;

// 单例模式
// - Gfx 自身的生命周期管理比较简单，因此适合使用单例模式
// - 其他类的类型签名也会变得更简单，不再需要到处传递 device
impl Gfx {
    /// 获取单例实例
    ///
    /// # Panics
    /// 如果 Gfx 还未初始化，此方法会 panic
    #[inline]
    pub fn get() -> &'static Gfx {
        unsafe {
            // 使用 addr_of! 避免直接对 static mut 创建引用
            let ptr = std::ptr::addr_of!(G_GFX);
            match (*ptr).as_ref() {
                Some(gfx) => gfx,
                None => panic!("Gfx not initialized. Call Gfx::init() first."),
            }
        }
    }

    /// 初始化 Gfx 单例
    ///
    /// - `window`：用于创建 surface，并筛选能够向其 present 的物理设备
    /// - `immediate_timeout_ns`：[`Gfx::one_time_exec`] 等待 fence 的超时时间
    ///
    /// # Panics
    /// 如果 Gfx 已经被初始化，此方法会 panic
    pub fn init(
        app_name: &str,
        window: &(impl HasDisplayHandle + HasWindowHandle),
        enable_validation: bool,
        immediate_timeout_ns: u64,
    ) -> anyhow::Result<()> {
        let gfx = Self::new(app_name, window, enable_validation, immediate_timeout_ns)?;
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            assert!((*ptr).is_none(), "Gfx already initialized");
            *ptr = Some(gfx);
        }
        Ok(())
    }

    /// 销毁 Gfx 单例
    ///
    /// 调用此方法后，不应再使用 `Gfx::get()`
    pub fn destroy() {
        let gfx = unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            (*ptr).take()
        };
        let Some(mut gfx) = gfx else {
            log::warn!("Gfx::destroy called without Gfx::init");
            return;
        };

        gfx.temp_graphics_command_pool.destroy_internal(&gfx.gfx_core.gfx_device);
        // vma 需要在 device 之前销毁
        drop(gfx.allocator.take());
        gfx.gfx_core.destroy();
    }
}

// getter
impl Gfx {
    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.gfx_core.instance
    }

    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.gfx_core.gfx_device
    }

    #[inline]
    pub fn allocator(&self) -> &GfxMemAllocator {
        match &self.allocator {
            Some(allocator) => allocator,
            None => panic!("GfxMemAllocator already destroyed"),
        }
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.gfx_core.physical_device
    }

    #[inline]
    pub fn surface(&self) -> &GfxSurface {
        &self.gfx_core.surface
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.gfx_queue
    }

    #[inline]
    pub fn present_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.present_queue
    }

    /// SBT 的 handle size 与对齐规则
    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static> {
        &self.gfx_core.physical_device.rt_pipeline_props
    }

    /// scratch buffer 的对齐规则
    #[inline]
    pub fn acc_struct_props(&self) -> &vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static> {
        &self.gfx_core.physical_device.acc_struct_props
    }

    #[inline]
    pub fn immediate_timeout_ns(&self) -> u64 {
        self.immediate_timeout_ns
    }
}

// tools
impl Gfx {
    /// 立即执行某个 command，并同步等待执行结果
    ///
    /// 等待使用独立的 fence，超时视为错误
    ///
    /// 提交之前失败时会释放临时的 command buffer 与 fence；提交之后等待失败时 GPU 可能仍在使用它们，只能泄漏
    pub fn one_time_exec<F, R>(&self, func: F, name: &str) -> anyhow::Result<R>
    where
        F: FnOnce(&GfxCommandBuffer) -> anyhow::Result<R>,
    {
        let _span = tracy_client::span!("Gfx::one_time_exec");

        let command_buffer = GfxCommandBuffer::new(&self.temp_graphics_command_pool, &format!("one-time-{name}"))?;
        let fence = match GfxFence::new(false, &format!("one-time-{name}")) {
            Ok(fence) => fence,
            Err(e) => {
                command_buffer.free();
                return Err(e);
            }
        };

        let recorded = (|| {
            command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name)?;
            command_buffer.begin_label(name, LabelColor::COLOR_IMMEDIATE);
            let result = func(&command_buffer);
            command_buffer.end_label();
            command_buffer.end()?;
            let result = result?;

            self.gfx_queue().submit(vec![GfxSubmitInfo::new(std::slice::from_ref(&command_buffer))], Some(&fence))?;
            Ok(result)
        })();

        let result = match recorded {
            Ok(result) => result,
            Err(e) => {
                fence.destroy();
                command_buffer.free();
                return Err(e);
            }
        };

        fence.wait(self.immediate_timeout_ns).with_context(|| format!("one time exec: {name}"))?;
        fence.destroy();
        command_buffer.free();

        Ok(result)
    }

    #[inline]
    pub fn wait_idle(&self) -> anyhow::Result<()> {
        self.gfx_device().wait_idle()
    }
}
