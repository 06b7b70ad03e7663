use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::{basic::bytes::BytesConvert, foundation::debug_messenger::DebugType, gfx::Gfx};

/// 由 vma 分配的 buffer
///
/// # Destroy
/// 需要手动调用 [`GfxBuffer::destroy`]，调用者需要保证 GPU 已经不再使用该 buffer
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,

    /// 在初始化阶段写死，只有 host 可访问的 buffer 才有值
    map_ptr: Option<*mut u8>,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    device_addr: Option<vk::DeviceAddress>,

    debug_name: String,
}

impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// init & destroy
impl GfxBuffer {
    /// - `mem_usage`：vma 的内存偏好
    /// - `alloc_flags`：包含 HOST_ACCESS_* 时，会在创建时就 map
    #[inline]
    pub fn new(
        buffer_size: vk::DeviceSize,
        buffer_usage: vk::BufferUsageFlags,
        alloc_flags: vk_mem::AllocationCreateFlags,
        mem_usage: vk_mem::MemoryUsage,
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        Self::new_with_alignment(buffer_size, buffer_usage, alloc_flags, mem_usage, None, name)
    }

    /// - `align`：buffer 起始地址的对齐要求，例如 scratch buffer 与 SBT
    pub fn new_with_alignment(
        buffer_size: vk::DeviceSize,
        buffer_usage: vk::BufferUsageFlags,
        alloc_flags: vk_mem::AllocationCreateFlags,
        mem_usage: vk_mem::MemoryUsage,
        align: Option<vk::DeviceSize>,
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let name = name.as_ref();
        let allocator = Gfx::get().allocator();
        let gfx_device = Gfx::get().gfx_device();

        let buffer_ci = vk::BufferCreateInfo::default().size(buffer_size).usage(buffer_usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: mem_usage,
            flags: alloc_flags,
            ..Default::default()
        };

        let created = unsafe {
            match align {
                Some(align) => allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, align),
                None => allocator.create_buffer(&buffer_ci, &alloc_ci),
            }
        };
        let (buffer, mut alloc) = created
            .with_context(|| format!("failed to create buffer {name} ({buffer_size} bytes)"))?;

        let host_access =
            vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE | vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM;
        let map_ptr = if alloc_flags.intersects(host_access) {
            match unsafe { allocator.map_memory(&mut alloc) } {
                Ok(ptr) => Some(ptr),
                Err(e) => {
                    // 不允许出现只构造了一半的 buffer
                    unsafe { allocator.destroy_buffer(buffer, &mut alloc) };
                    return Err(e).with_context(|| format!("failed to map buffer {name}"));
                }
            }
        } else {
            None
        };

        let device_addr = buffer_usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            gfx_device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });

        let buffer = Self {
            handle: buffer,
            allocation: alloc,
            size: buffer_size,
            map_ptr,
            device_addr,
            debug_name: name.to_string(),
        };
        gfx_device.set_debug_name(&buffer, name);
        Ok(buffer)
    }

    /// CPU 写入、GPU 读取的 stage buffer
    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        Self::new(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            vk_mem::MemoryUsage::Auto,
            debug_name,
        )
    }

    /// 立即销毁，调用者需要保证 GPU 已经不再使用
    pub fn destroy(mut self) {
        let allocator = Gfx::get().allocator();
        unsafe {
            if self.map_ptr.take().is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
        self.handle = vk::Buffer::null();
    }
}

impl Drop for GfxBuffer {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxBuffer {} must be destroyed manually.", self.debug_name);
    }
}

// getter
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    /// # Panics
    /// buffer usage 不包含 SHADER_DEVICE_ADDRESS 时 panic
    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        match self.device_addr {
            Some(addr) => addr,
            None => panic!("GfxBuffer {} was created without SHADER_DEVICE_ADDRESS", self.debug_name),
        }
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

// tools
impl GfxBuffer {
    /// 通过 mem map 的方式将 data 一次性写入到 buffer 的开头
    pub fn write_by_mmap<T: Copy>(&self, data: &[T]) -> anyhow::Result<()> {
        let bytes = BytesConvert::bytes_of_slice(data);
        let ptr = self.map_ptr.with_context(|| format!("buffer {} is not host visible", self.debug_name))?;
        anyhow::ensure!(
            bytes.len() as vk::DeviceSize <= self.size,
            "buffer {} is too small: {} > {}",
            self.debug_name,
            bytes.len(),
            self.size
        );

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        }
        Gfx::get()
            .allocator()
            .flush_allocation(&self.allocation, 0, bytes.len() as vk::DeviceSize)
            .with_context(|| format!("failed to flush buffer {}", self.debug_name))
    }

    /// 创建一个临时的 stage buffer，先将数据放入 stage buffer，再 transfer 到 self
    ///
    /// 同步等待传输完成，适合初始化阶段传输大块数据
    pub fn transfer_data_sync<T: Copy>(&self, data: &[T]) -> anyhow::Result<()> {
        let data_size = size_of_val(data) as vk::DeviceSize;
        let stage_buffer = Self::new_stage_buffer(data_size, format!("{}-stage", self.debug_name))?;

        let result = stage_buffer.write_by_mmap(data).and_then(|_| {
            Gfx::get().one_time_exec(
                |cmd| {
                    cmd.cmd_copy_buffer(
                        &stage_buffer,
                        self,
                        &[vk::BufferCopy {
                            size: data_size,
                            ..Default::default()
                        }],
                    );
                    Ok(())
                },
                &format!("{}-transfer", self.debug_name),
            )
        });
        stage_buffer.destroy();

        result
    }
}
