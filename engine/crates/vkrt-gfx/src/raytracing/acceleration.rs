use anyhow::Context;
use ash::vk;

use crate::{
    basic::color::LabelColor,
    commands::{barrier::GfxMemoryBarrier, command_buffer::GfxCommandBuffer},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    resources::buffer::GfxBuffer,
};

/// TLAS 中的一个实例，只在构建 TLAS 时使用
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlasInstance {
    pub transform: glam::Mat4,
    /// shader 中通过 InstanceID() 读取，只有低 24 位有效
    pub instance_index: u32,
    pub blas_address: vk::DeviceAddress,
}

impl BlasInstance {
    /// 转换为 vk 的 instance 结构体
    ///
    /// - transform 是 3x4 的行主序矩阵
    /// - mask 为 0xFF，sbt offset 为 0，关闭三角形的背面剔除
    pub fn to_vk_instance(&self) -> vk::AccelerationStructureInstanceKHR {
        // glam 是列主序，转置之后的前 3 列就是原矩阵的前 3 行
        let rows = self.transform.transpose().to_cols_array();
        vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR {
                matrix: std::array::from_fn(|i| rows[i]),
            },
            instance_custom_index_and_mask: vk::Packed24_8::new(self.instance_index, 0xFF),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                0,
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: self.blas_address,
            },
        }
    }
}

/// 构建 BLAS 所需的三角形数据，vertex 的前 12 个字节是 position
#[derive(Copy, Clone, Debug)]
pub struct BlasTriangleGeometry {
    pub vertex_address: vk::DeviceAddress,
    pub vertex_stride: vk::DeviceSize,
    pub vertex_count: u32,
    pub index_address: vk::DeviceAddress,
    pub index_count: u32,
}

/// 加速结构以及承载它的 buffer
///
/// # Destroy
/// 需要手动调用 [`GfxAcceleration::destroy`]
pub struct GfxAcceleration {
    handle: vk::AccelerationStructureKHR,
    buffer: Option<GfxBuffer>,
    /// 创建时就缓存下来，构建 TLAS 时需要 BLAS 的地址
    device_address: vk::DeviceAddress,
}

impl DebugType for GfxAcceleration {
    fn debug_type_name() -> &'static str {
        "GfxAcceleration"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// 创建与销毁
impl GfxAcceleration {
    /// 创建 AccelerationStructure 以及 buffer
    fn new(size: vk::DeviceSize, ty: vk::AccelerationStructureTypeKHR, debug_name: &str) -> anyhow::Result<Self> {
        let buffer = GfxBuffer::new(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk_mem::AllocationCreateFlags::empty(),
            vk_mem::MemoryUsage::AutoPreferDevice,
            format!("{debug_name}-buffer"),
        )?;

        let create_info =
            vk::AccelerationStructureCreateInfoKHR::default().ty(ty).size(size).buffer(buffer.vk_buffer());

        let gfx_device = Gfx::get().gfx_device();
        let handle = match unsafe { gfx_device.acceleration_structure.create_acceleration_structure(&create_info, None) }
        {
            Ok(handle) => handle,
            Err(e) => {
                buffer.destroy();
                return Err(e).with_context(|| format!("vkCreateAccelerationStructureKHR: {debug_name}"));
            }
        };

        let device_address = unsafe {
            gfx_device.acceleration_structure.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle),
            )
        };

        let acc = Self {
            handle,
            buffer: Some(buffer),
            device_address,
        };
        gfx_device.set_debug_name(&acc, debug_name);
        Ok(acc)
    }

    /// 立即销毁，调用者需要保证 GPU 已经不再使用
    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().acceleration_structure.destroy_acceleration_structure(self.handle, None);
        }
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
        self.handle = vk::AccelerationStructureKHR::null();
    }

    /// 同步构建 blas，每个 mesh 只构建一次
    ///
    /// # 构建过程
    /// 1. 查询构建 blas 所需的尺寸
    /// 2. 创建 blas 以及 scratch buffer
    /// 3. 通过一次性提交构建 blas，等待完成后释放 scratch buffer
    pub fn build_blas_sync(geometry: &BlasTriangleGeometry, debug_name: &str) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxAcceleration::build_blas_sync");
        anyhow::ensure!(geometry.vertex_count > 0, "blas {debug_name} has no vertices");
        anyhow::ensure!(geometry.index_count >= 3, "blas {debug_name} has no triangles");

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.vertex_address,
            })
            .vertex_stride(geometry.vertex_stride)
            .max_vertex(geometry.vertex_count - 1)
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.index_address,
            });
        let as_geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE);
        let primitive_count = geometry.index_count / 3;
        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);

        // 使用部分完整的 build geometry info 来查询所需的资源大小
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&as_geometry));
        let size_info = Self::query_build_sizes(&build_info, primitive_count);

        let blas = Self::new(size_info.acceleration_structure_size, vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL, debug_name)?;
        let scratch_buffer = match Self::new_scratch_buffer(size_info.build_scratch_size, &format!("{debug_name}-scratch")) {
            Ok(scratch) => scratch,
            Err(e) => {
                blas.destroy();
                return Err(e);
            }
        };

        // 补全剩下的 build info
        build_info.dst_acceleration_structure = blas.handle;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: scratch_buffer.device_address(),
        };

        let result = Gfx::get().one_time_exec(
            |cmd| {
                cmd.begin_label(debug_name, LabelColor::COLOR_ACCEL);
                cmd.build_acceleration_structure(&build_info, std::slice::from_ref(&range_info));
                cmd.end_label();
                Ok(())
            },
            &format!("build-blas-{debug_name}"),
        );
        scratch_buffer.destroy();

        match result {
            Ok(()) => Ok(blas),
            Err(e) => {
                blas.destroy();
                Err(e)
            }
        }
    }

    fn query_build_sizes(
        build_info: &vk::AccelerationStructureBuildGeometryInfoKHR,
        max_primitive_count: u32,
    ) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
        let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            Gfx::get().gfx_device().acceleration_structure.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                build_info,
                &[max_primitive_count],
                &mut size_info,
            );
        }
        size_info
    }

    /// scratch buffer 的地址需要满足 minAccelerationStructureScratchOffsetAlignment
    fn new_scratch_buffer(size: vk::DeviceSize, debug_name: &str) -> anyhow::Result<GfxBuffer> {
        let align = Gfx::get().acc_struct_props().min_acceleration_structure_scratch_offset_alignment;
        GfxBuffer::new_with_alignment(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk_mem::AllocationCreateFlags::empty(),
            vk_mem::MemoryUsage::AutoPreferDevice,
            Some(align as vk::DeviceSize),
            debug_name,
        )
    }
}

// getters
impl GfxAcceleration {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }
}

impl Drop for GfxAcceleration {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::AccelerationStructureKHR::null(), "GfxAcceleration must be destroyed manually.");
    }
}

/// TLAS 的构建方式
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TlasBuildMode {
    /// 重新创建 TLAS 并完整构建
    Build,
    /// 原地 refit，只更新 instance 的变换
    Update,
}

impl TlasBuildMode {
    /// 只有请求 refit、已有可更新的 TLAS、并且 instance 数量不变且非零时，才会原地 refit
    pub fn choose(refit_requested: bool, existing_instance_count: Option<u32>, new_instance_count: u32) -> Self {
        match existing_instance_count {
            Some(count) if refit_requested && count == new_instance_count && count > 0 => Self::Update,
            _ => Self::Build,
        }
    }
}

/// TLAS 构建时需要分配的资源尺寸
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TlasAllocationPlan {
    /// 没有 instance 时不分配 instance buffer，instance 地址为 0
    pub instance_buffer_size: Option<vk::DeviceSize>,
    /// 设备报告的 scratch 尺寸为 0 时不分配
    pub scratch_size: Option<vk::DeviceSize>,
}

impl TlasAllocationPlan {
    pub fn new(instance_count: usize, sizes: &vk::AccelerationStructureBuildSizesInfoKHR) -> Self {
        let instance_buffer_size = (instance_count > 0)
            .then(|| (instance_count * size_of::<vk::AccelerationStructureInstanceKHR>()) as vk::DeviceSize);
        // scratch 需要同时满足 build 与之后的 update
        let scratch_size = u64::max(sizes.build_scratch_size, sizes.update_scratch_size);
        Self {
            instance_buffer_size,
            scratch_size: (scratch_size > 0).then_some(scratch_size),
        }
    }
}

/// 每个 frame slot 独占的 TLAS，以及构建它所需的 instance buffer 与 scratch buffer
///
/// 构建命令录制在帧的 command buffer 中，因此这些资源只能在该 slot 的 fence 被等待之后才能修改或销毁
pub struct GfxTlas {
    acceleration: GfxAcceleration,
    instance_buffer: Option<GfxBuffer>,
    scratch_buffer: Option<GfxBuffer>,
    instance_count: u32,
}

impl GfxTlas {
    const BUILD_FLAGS: vk::BuildAccelerationStructureFlagsKHR = vk::BuildAccelerationStructureFlagsKHR::from_raw(
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE.as_raw()
            | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE.as_raw(),
    );

    /// 创建新的 TLAS，并将完整构建录制到 `cmd` 中，之后插入 AS 写 -> 光追读 的 barrier
    pub fn record_build(cmd: &GfxCommandBuffer, instances: &[BlasInstance], debug_name: &str) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxTlas::record_build");
        let instance_count = instances.len() as u32;

        // 查询尺寸只需要 geometry 的类型以及 instance 数量
        let query_geometry = Self::instances_geometry(0);
        let query_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(Self::BUILD_FLAGS)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&query_geometry));
        let size_info = GfxAcceleration::query_build_sizes(&query_info, instance_count);
        let plan = TlasAllocationPlan::new(instances.len(), &size_info);

        let acceleration =
            GfxAcceleration::new(size_info.acceleration_structure_size, vk::AccelerationStructureTypeKHR::TOP_LEVEL, debug_name)?;
        let mut tlas = Self {
            acceleration,
            instance_buffer: None,
            scratch_buffer: None,
            instance_count,
        };

        // 失败时已经创建的部分随 tlas 一起销毁
        let allocated = (|| {
            if let Some(size) = plan.instance_buffer_size {
                tlas.instance_buffer = Some(GfxBuffer::new(
                    size,
                    vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                    vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                    vk_mem::MemoryUsage::Auto,
                    format!("{debug_name}-instances"),
                )?);
            }
            if let Some(size) = plan.scratch_size {
                tlas.scratch_buffer = Some(GfxAcceleration::new_scratch_buffer(size, &format!("{debug_name}-scratch"))?);
            }
            tlas.write_instances(instances)
        })();
        if let Err(e) = allocated {
            tlas.destroy();
            return Err(e);
        }

        tlas.record(cmd, vk::BuildAccelerationStructureModeKHR::BUILD, debug_name);
        Ok(tlas)
    }

    /// 原地 refit：重写 instance buffer，以自身为 src 与 dst 录制 UPDATE
    ///
    /// instance 数量必须与构建时相同
    pub fn record_update(&mut self, cmd: &GfxCommandBuffer, instances: &[BlasInstance], debug_name: &str) -> anyhow::Result<()> {
        let _span = tracy_client::span!("GfxTlas::record_update");
        anyhow::ensure!(
            instances.len() as u32 == self.instance_count && self.instance_count > 0,
            "tlas {debug_name}: refit requires {} instances, got {}",
            self.instance_count,
            instances.len()
        );

        self.write_instances(instances)?;
        self.record(cmd, vk::BuildAccelerationStructureModeKHR::UPDATE, debug_name);
        Ok(())
    }

    /// 一次 memcpy 写入所有 instance
    fn write_instances(&self, instances: &[BlasInstance]) -> anyhow::Result<()> {
        let Some(instance_buffer) = &self.instance_buffer else {
            return Ok(());
        };
        let vk_instances = instances.iter().map(BlasInstance::to_vk_instance).collect::<Vec<_>>();
        instance_buffer.write_by_mmap(&vk_instances)
    }

    fn record(&self, cmd: &GfxCommandBuffer, mode: vk::BuildAccelerationStructureModeKHR, debug_name: &str) {
        let instance_address = self.instance_buffer.as_ref().map_or(0, GfxBuffer::device_address);
        let scratch_address = self.scratch_buffer.as_ref().map_or(0, GfxBuffer::device_address);

        let geometry = Self::instances_geometry(instance_address);
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(Self::BUILD_FLAGS)
            .mode(mode)
            .geometries(std::slice::from_ref(&geometry))
            .dst_acceleration_structure(self.acceleration.handle);
        if mode == vk::BuildAccelerationStructureModeKHR::UPDATE {
            build_info = build_info.src_acceleration_structure(self.acceleration.handle);
        }
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: scratch_address,
        };
        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(self.instance_count);

        cmd.begin_label(debug_name, LabelColor::COLOR_ACCEL);
        cmd.build_acceleration_structure(&build_info, std::slice::from_ref(&range_info));
        cmd.memory_barrier(&[GfxMemoryBarrier::acceleration_build_to_trace()]);
        cmd.end_label();
    }

    fn instances_geometry(instance_address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR<'static> {
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    // false: data 是 &[vk::AccelerationStructureInstanceKHR]
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instance_address,
                    }),
            })
    }

    /// 立即销毁，调用者需要保证该 slot 的 fence 已经被等待
    pub fn destroy(self) {
        self.acceleration.destroy();
        if let Some(buffer) = self.instance_buffer {
            buffer.destroy();
        }
        if let Some(buffer) = self.scratch_buffer {
            buffer.destroy();
        }
    }
}

// getters
impl GfxTlas {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.acceleration.handle
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    #[inline]
    pub fn instance_address(&self) -> vk::DeviceAddress {
        self.instance_buffer.as_ref().map_or(0, GfxBuffer::device_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(build_scratch: u64, update_scratch: u64) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
        vk::AccelerationStructureBuildSizesInfoKHR::default()
            .acceleration_structure_size(256)
            .build_scratch_size(build_scratch)
            .update_scratch_size(update_scratch)
    }

    #[test]
    fn test_empty_tlas_allocates_nothing_when_scratch_is_zero() {
        let plan = TlasAllocationPlan::new(0, &sizes(0, 0));
        assert_eq!(plan.instance_buffer_size, None);
        assert_eq!(plan.scratch_size, None);
    }

    #[test]
    fn test_empty_tlas_still_gets_nonzero_scratch() {
        let plan = TlasAllocationPlan::new(0, &sizes(128, 0));
        assert_eq!(plan.instance_buffer_size, None);
        assert_eq!(plan.scratch_size, Some(128));
    }

    #[test]
    fn test_instance_buffer_holds_every_instance() {
        let plan = TlasAllocationPlan::new(3, &sizes(512, 1024));
        assert_eq!(plan.instance_buffer_size, Some(3 * 64));
        assert_eq!(plan.scratch_size, Some(1024));
    }

    #[test]
    fn test_build_mode() {
        assert_eq!(TlasBuildMode::choose(true, Some(4), 4), TlasBuildMode::Update);
        assert_eq!(TlasBuildMode::choose(false, Some(4), 4), TlasBuildMode::Build);
        assert_eq!(TlasBuildMode::choose(true, Some(4), 5), TlasBuildMode::Build);
        assert_eq!(TlasBuildMode::choose(true, Some(0), 0), TlasBuildMode::Build);
        assert_eq!(TlasBuildMode::choose(true, None, 4), TlasBuildMode::Build);
    }

    #[test]
    fn test_instance_conversion() {
        let instance = BlasInstance {
            transform: glam::Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0)),
            instance_index: 7,
            blas_address: 0xABCD_0000,
        };
        let vk_instance = instance.to_vk_instance();

        #[rustfmt::skip]
        let expected = [
            1.0, 0.0, 0.0, 1.0,
            0.0, 1.0, 0.0, 2.0,
            0.0, 0.0, 1.0, 3.0,
        ];
        assert_eq!(vk_instance.transform.matrix, expected);
        assert_eq!(vk_instance.instance_custom_index_and_mask.low_24(), 7);
        assert_eq!(vk_instance.instance_custom_index_and_mask.high_8(), 0xFF);
        assert_eq!(vk_instance.instance_shader_binding_table_record_offset_and_flags.low_24(), 0);
        assert_eq!(
            vk_instance.instance_shader_binding_table_record_offset_and_flags.high_8() as u32,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(unsafe { vk_instance.acceleration_structure_reference.device_handle }, 0xABCD_0000);
    }

    #[test]
    fn test_non_uniform_transform_is_row_major() {
        let transform = glam::Mat4::from_cols(
            glam::vec4(1.0, 2.0, 3.0, 0.0),
            glam::vec4(4.0, 5.0, 6.0, 0.0),
            glam::vec4(7.0, 8.0, 9.0, 0.0),
            glam::vec4(10.0, 11.0, 12.0, 1.0),
        );
        let instance = BlasInstance {
            transform,
            instance_index: 0,
            blas_address: 0,
        };
        #[rustfmt::skip]
        let expected = [
            1.0, 4.0, 7.0, 10.0,
            2.0, 5.0, 8.0, 11.0,
            3.0, 6.0, 9.0, 12.0,
        ];
        assert_eq!(instance.to_vk_instance().transform.matrix, expected);
    }
}
