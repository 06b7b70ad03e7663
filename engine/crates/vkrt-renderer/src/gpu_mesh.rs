use ash::vk;
use vkrt_asset::vertex::Vertex;
use vkrt_gfx::{raytracing::acceleration::BlasTriangleGeometry, resources::buffer::GfxBuffer};

/// 上传到 GPU 的 mesh：vertex buffer 与 index buffer
///
/// 两个 buffer 都带有 device address，BLAS 构建与 shader 都通过地址访问
pub struct GpuMeshBuffers {
    pub vertex_buffer: GfxBuffer,
    pub index_buffer: GfxBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl GpuMeshBuffers {
    #[inline]
    pub fn vertex_address(&self) -> vk::DeviceAddress {
        self.vertex_buffer.device_address()
    }

    #[inline]
    pub fn index_address(&self) -> vk::DeviceAddress {
        self.index_buffer.device_address()
    }

    pub fn blas_geometry(&self) -> BlasTriangleGeometry {
        BlasTriangleGeometry {
            vertex_address: self.vertex_address(),
            vertex_stride: size_of::<Vertex>() as vk::DeviceSize,
            vertex_count: self.vertex_count,
            index_address: self.index_address(),
            index_count: self.index_count,
        }
    }

    /// 立即销毁，调用者需要保证 GPU 已经不再使用
    pub fn destroy(self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }
}
