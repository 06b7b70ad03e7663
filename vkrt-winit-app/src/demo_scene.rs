use anyhow::Context;
use glam::{Mat4, Vec3, Vec4};
use vkrt_asset::{
    asset::{MaterialAsset, MeshAsset, ModelAsset, TextureAsset},
    asset_registry::AssetRegistry,
    handle::{MeshHandle, ModelHandle},
    vertex::Vertex,
};
use vkrt_gfx::raytracing::acceleration::BlasInstance;
use vkrt_renderer::{gpu_asset_loader::GpuMesh, renderer::Renderer};

/// 演示场景：一个三角形的 BLAS，在 TLAS 中实例化两次并绕 Y 轴旋转
pub struct DemoScene {
    assets: AssetRegistry<Renderer>,
    model: ModelHandle,
    mesh: MeshHandle,
}

// new & init
impl DemoScene {
    pub const INSTANCE_COUNT: usize = 2;
    /// 每秒旋转的弧度
    const ANGULAR_SPEED: f32 = 0.8;
    const INSTANCE_OFFSET: f32 = 1.2;

    pub fn new(renderer: &mut Renderer) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("DemoScene::new");

        let mut assets = AssetRegistry::new();
        let texture = assets.register_texture(
            "checker",
            TextureAsset::checkerboard(64, [230, 230, 230, 255], [40, 40, 40, 255]),
        )?;
        let mesh = assets.register_mesh("triangle", Self::triangle_mesh());
        let material = assets.register_material(
            "triangle",
            MaterialAsset {
                color_factors: Vec4::ONE,
                metal_rough_factors: Vec4::new(0.0, 0.5, 0.0, 0.0),
                base_color: Some(texture),
                metal_rough: None,
                normal: None,
            },
        )?;
        let model = assets.register_model(
            "triangle",
            ModelAsset {
                mesh,
                materials: vec![material],
            },
        )?;

        assets.acquire(renderer, model)?;

        let scene = Self { assets, model, mesh };
        let blas_address = match scene.blas_address() {
            Ok(address) => address,
            Err(e) => {
                scene.destroy(renderer)?;
                return Err(e);
            }
        };
        renderer.set_tlas_build(Self::instances(blas_address, 0.0));
        renderer.set_view_matrix(Mat4::look_at_rh(Vec3::new(0.0, 0.5, 4.0), Vec3::ZERO, Vec3::Y));

        Ok(scene)
    }

    pub fn triangle_mesh() -> MeshAsset {
        MeshAsset {
            vertices: vec![
                Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec4::new(1.0, 0.0, 0.0, 1.0)),
                Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec4::new(0.0, 1.0, 0.0, 1.0)),
                Vertex::new(Vec3::new(0.0, 0.5, 0.0), Vec4::new(0.0, 0.0, 1.0, 1.0)),
            ],
            indices: vec![0, 1, 2],
        }
    }

    /// 释放场景持有的全部资产，GPU 资源进入渲染器的延迟销毁队列
    pub fn destroy(mut self, renderer: &mut Renderer) -> anyhow::Result<()> {
        let released = self.assets.release(renderer, self.model);
        // release 失败时仍然需要卸载剩余的 GPU 资源
        self.assets.unload_all(renderer);
        released
    }
}

// update
impl DemoScene {
    /// 每帧刷新 instance 的变换，instance 数量不变，因此渲染器会进行 refit
    pub fn update(&self, renderer: &mut Renderer, time_secs: f32) -> anyhow::Result<()> {
        let blas_address = self.blas_address()?;
        renderer.set_tlas_update(Self::instances(blas_address, time_secs));
        Ok(())
    }

    pub fn instances(blas_address: u64, time_secs: f32) -> Vec<BlasInstance> {
        let angle = time_secs * Self::ANGULAR_SPEED;
        (0..Self::INSTANCE_COUNT)
            .map(|i| {
                let side = if i % 2 == 0 { -1.0 } else { 1.0 };
                // 两个实例反向旋转
                let transform = Mat4::from_translation(Vec3::new(side * Self::INSTANCE_OFFSET, 0.0, 0.0))
                    * Mat4::from_rotation_y(side * angle);
                BlasInstance {
                    transform,
                    instance_index: i as u32,
                    blas_address,
                }
            })
            .collect()
    }

    fn blas_address(&self) -> anyhow::Result<u64> {
        self.assets.gpu_mesh(self.mesh).map(GpuMesh::blas_address).context("triangle mesh is not loaded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_mesh() {
        let mesh = DemoScene::triangle_mesh();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh.indices.iter().all(|i| (*i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn test_instance_count_is_stable_over_time() {
        let a = DemoScene::instances(0x1000, 0.0);
        let b = DemoScene::instances(0x1000, 3.5);
        assert_eq!(a.len(), DemoScene::INSTANCE_COUNT);
        assert_eq!(a.len(), b.len());
        assert_ne!(a[0].transform, b[0].transform);
        assert!(b.iter().all(|instance| instance.blas_address == 0x1000));
    }

    #[test]
    fn test_instances_are_placed_apart() {
        let instances = DemoScene::instances(0x1000, 1.0);
        let left = instances[0].transform.transform_point3(Vec3::ZERO);
        let right = instances[1].transform.transform_point3(Vec3::ZERO);
        assert!(left.x < 0.0 && right.x > 0.0);
        assert_eq!(instances[1].instance_index, 1);
    }
}
