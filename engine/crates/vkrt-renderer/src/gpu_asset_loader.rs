use ash::vk;
use vkrt_asset::{
    asset::{MeshAsset, TextureAsset},
    asset_loader::AssetLoader,
};
use vkrt_gfx::{raytracing::acceleration::GfxAcceleration, resources::image::GfxImage};

use crate::{gpu_mesh::GpuMeshBuffers, renderer::Renderer};

/// mesh 在 GPU 上的全部资源
pub struct GpuMesh {
    pub buffers: GpuMeshBuffers,
    pub blas: GfxAcceleration,
}

impl GpuMesh {
    /// 用于构建 TLAS instance
    #[inline]
    pub fn blas_address(&self) -> vk::DeviceAddress {
        self.blas.device_address()
    }
}

/// 纹理上传时使用的格式与用途
pub struct TextureUploadDesc;
impl TextureUploadDesc {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
    pub const USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::SAMPLED;
    pub const MIPMAPPED: bool = true;

    pub fn extent(texture: &TextureAsset) -> vk::Extent3D {
        let [width, height, depth] = texture.extent;
        vk::Extent3D { width, height, depth }
    }
}

/// 渲染器作为资产注册表的 loader
///
/// 加载是同步的；卸载时资源进入延迟销毁队列
impl AssetLoader for Renderer {
    type GpuMesh = GpuMesh;
    type GpuTexture = GfxImage;

    fn load_mesh(&mut self, id: &str, mesh: &MeshAsset) -> anyhow::Result<GpuMesh> {
        let _span = tracy_client::span!("Renderer::load_mesh");

        let buffers = self.upload_mesh(&mesh.vertices, &mesh.indices, id)?;
        let blas = match self.create_blas(&buffers, &format!("{id}-blas")) {
            Ok(blas) => blas,
            Err(e) => {
                buffers.destroy();
                return Err(e);
            }
        };

        log::debug!("mesh {id} uploaded: {} vertices, {} indices", buffers.vertex_count, buffers.index_count);
        Ok(GpuMesh { buffers, blas })
    }

    fn unload_mesh(&mut self, id: &str, gpu_mesh: GpuMesh) {
        log::debug!("mesh {id}: blas and buffers enqueued for destruction");
        self.enqueue_blas_destruction(gpu_mesh.blas);
        self.enqueue_mesh_destruction(gpu_mesh.buffers);
    }

    fn load_texture(&mut self, id: &str, texture: &TextureAsset) -> anyhow::Result<GfxImage> {
        let _span = tracy_client::span!("Renderer::load_texture");
        anyhow::ensure!(texture.is_valid(), "texture {id}: pixel count does not match extent {:?}", texture.extent);

        let image = self.upload_image(
            &texture.pixels,
            TextureUploadDesc::extent(texture),
            TextureUploadDesc::FORMAT,
            TextureUploadDesc::USAGE,
            TextureUploadDesc::MIPMAPPED,
            id,
        )?;
        log::debug!("texture {id} uploaded: {:?}, {} mips", texture.extent, image.mip_levels());
        Ok(image)
    }

    fn unload_texture(&mut self, id: &str, gpu_texture: GfxImage) {
        log::debug!("texture {id}: image enqueued for destruction");
        self.enqueue_image_destruction(gpu_texture);
    }
}

#[cfg(test)]
mod tests {
    use vkrt_gfx::resources::image::VulkanFormatUtils;

    use super::*;

    #[test]
    fn test_texture_upload_desc_matches_asset_layout() {
        assert_eq!(
            VulkanFormatUtils::texel_size_in_bytes(TextureUploadDesc::FORMAT),
            Some(TextureAsset::BYTES_PER_TEXEL)
        );

        let texture = TextureAsset::checkerboard(8, [255, 0, 255, 255], [0, 0, 0, 255]);
        let extent = TextureUploadDesc::extent(&texture);
        assert_eq!((extent.width, extent.height, extent.depth), (8, 8, 1));
        assert_eq!(VulkanFormatUtils::mip_levels(extent, TextureUploadDesc::MIPMAPPED), 4);
    }
}
