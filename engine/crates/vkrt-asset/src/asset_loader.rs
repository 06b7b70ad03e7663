use crate::asset::{MeshAsset, TextureAsset};

/// 负责资产的 GPU 资源
///
/// 只有 Mesh 和 Texture 拥有 GPU 资源；Model 和 Material 只通过依赖关系影响其他资产
pub trait AssetLoader {
    type GpuMesh;
    type GpuTexture;

    fn load_mesh(&mut self, id: &str, mesh: &MeshAsset) -> anyhow::Result<Self::GpuMesh>;

    /// GPU 可能仍在使用，实现需要延迟销毁
    fn unload_mesh(&mut self, id: &str, gpu_mesh: Self::GpuMesh);

    fn load_texture(&mut self, id: &str, texture: &TextureAsset) -> anyhow::Result<Self::GpuTexture>;

    /// GPU 可能仍在使用，实现需要延迟销毁
    fn unload_texture(&mut self, id: &str, gpu_texture: Self::GpuTexture);
}
