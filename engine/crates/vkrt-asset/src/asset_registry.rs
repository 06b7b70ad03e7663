use std::collections::HashMap;

use anyhow::Context;
use slotmap::SlotMap;

use crate::{
    asset::{MaterialAsset, MeshAsset, ModelAsset, TextureAsset},
    asset_loader::AssetLoader,
    handle::{AssetKind, AssetRef, MaterialHandle, MeshHandle, ModelHandle, TextureHandle},
};

/// 注册表中的一条记录
struct AssetEntry<D, G> {
    id: String,
    desc: D,
    ref_count: u32,
    /// acquire 时先于自身获取，release 时在自身之后释放
    dependencies: Vec<AssetRef>,
    /// 引用计数大于 0 时才存在
    gpu: Option<G>,
}

impl<D, G> AssetEntry<D, G> {
    fn new(id: String, desc: D, dependencies: Vec<AssetRef>) -> Self {
        Self {
            id,
            desc,
            ref_count: 0,
            dependencies,
            gpu: None,
        }
    }
}

/// 引用计数的资产注册表
///
/// - 每种资产一张表，id 在同一种类中唯一
/// - 引用计数 0 -> 1 时加载，1 -> 0 时卸载
/// - acquire 是事务性的：任何一个依赖获取失败，都会撤销本次调用中已经成功的获取
pub struct AssetRegistry<L: AssetLoader> {
    models: SlotMap<ModelHandle, AssetEntry<ModelAsset, ()>>,
    meshes: SlotMap<MeshHandle, AssetEntry<MeshAsset, L::GpuMesh>>,
    materials: SlotMap<MaterialHandle, AssetEntry<MaterialAsset, ()>>,
    textures: SlotMap<TextureHandle, AssetEntry<TextureAsset, L::GpuTexture>>,

    ids: HashMap<(AssetKind, String), AssetRef>,
}

impl<L: AssetLoader> Default for AssetRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

// 注册
impl<L: AssetLoader> AssetRegistry<L> {
    pub fn new() -> Self {
        Self {
            models: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            ids: HashMap::new(),
        }
    }

    /// 依赖的 mesh 与 material 必须已经注册
    pub fn register_model(&mut self, id: &str, model: ModelAsset) -> anyhow::Result<ModelHandle> {
        let mut dependencies = vec![AssetRef::Mesh(model.mesh)];
        dependencies.extend(model.materials.iter().map(|material| AssetRef::Material(*material)));
        self.ensure_registered(id, &dependencies)?;

        let id = self.unique_id(AssetKind::Model, id);
        let handle = self.models.insert(AssetEntry::new(id.clone(), model, dependencies));
        self.ids.insert((AssetKind::Model, id), handle.into());
        Ok(handle)
    }

    pub fn register_mesh(&mut self, id: &str, mesh: MeshAsset) -> MeshHandle {
        let id = self.unique_id(AssetKind::Mesh, id);
        let handle = self.meshes.insert(AssetEntry::new(id.clone(), mesh, Vec::new()));
        self.ids.insert((AssetKind::Mesh, id), handle.into());
        handle
    }

    /// 引用的 texture 必须已经注册
    pub fn register_material(&mut self, id: &str, material: MaterialAsset) -> anyhow::Result<MaterialHandle> {
        let dependencies = material.textures().map(AssetRef::Texture).collect::<Vec<_>>();
        self.ensure_registered(id, &dependencies)?;

        let id = self.unique_id(AssetKind::Material, id);
        let handle = self.materials.insert(AssetEntry::new(id.clone(), material, dependencies));
        self.ids.insert((AssetKind::Material, id), handle.into());
        Ok(handle)
    }

    pub fn register_texture(&mut self, id: &str, texture: TextureAsset) -> anyhow::Result<TextureHandle> {
        anyhow::ensure!(
            texture.is_valid(),
            "texture {id}: {} bytes do not match extent {:?}",
            texture.pixels.len(),
            texture.extent
        );

        let id = self.unique_id(AssetKind::Texture, id);
        let handle = self.textures.insert(AssetEntry::new(id.clone(), texture, Vec::new()));
        self.ids.insert((AssetKind::Texture, id), handle.into());
        Ok(handle)
    }

    fn ensure_registered(&self, id: &str, dependencies: &[AssetRef]) -> anyhow::Result<()> {
        for dep in dependencies {
            anyhow::ensure!(self.contains(*dep), "{id} depends on an unregistered {}: {:?}", dep.kind(), dep);
        }
        Ok(())
    }

    /// 在 id 冲突时不断生成新的候选，直到不再冲突
    fn unique_id(&self, kind: AssetKind, id: &str) -> String {
        let mut candidate = id.to_string();
        while self.ids.contains_key(&(kind, candidate.clone())) {
            candidate = next_id_candidate(&candidate);
        }
        if candidate != id {
            log::debug!("{kind} id {id} is taken, renamed to {candidate}");
        }
        candidate
    }
}

/// 如果 id 以 `_<数字>` 结尾，将数字加一；否则追加 `_1`
pub fn next_id_candidate(id: &str) -> String {
    match id.rsplit_once('_') {
        Some((prefix, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            match digits.parse::<u64>() {
                Ok(n) if n < u64::MAX => format!("{prefix}_{}", n + 1),
                _ => format!("{id}_1"),
            }
        }
        _ => format!("{id}_1"),
    }
}

// 查询
impl<L: AssetLoader> AssetRegistry<L> {
    #[inline]
    pub fn handle_by_id(&self, kind: AssetKind, id: &str) -> Option<AssetRef> {
        self.ids.get(&(kind, id.to_string())).copied()
    }

    pub fn contains(&self, asset: AssetRef) -> bool {
        match asset {
            AssetRef::Model(h) => self.models.contains_key(h),
            AssetRef::Mesh(h) => self.meshes.contains_key(h),
            AssetRef::Material(h) => self.materials.contains_key(h),
            AssetRef::Texture(h) => self.textures.contains_key(h),
        }
    }

    pub fn id(&self, asset: AssetRef) -> Option<&str> {
        match asset {
            AssetRef::Model(h) => self.models.get(h).map(|e| e.id.as_str()),
            AssetRef::Mesh(h) => self.meshes.get(h).map(|e| e.id.as_str()),
            AssetRef::Material(h) => self.materials.get(h).map(|e| e.id.as_str()),
            AssetRef::Texture(h) => self.textures.get(h).map(|e| e.id.as_str()),
        }
    }

    pub fn ref_count(&self, asset: AssetRef) -> Option<u32> {
        match asset {
            AssetRef::Model(h) => self.models.get(h).map(|e| e.ref_count),
            AssetRef::Mesh(h) => self.meshes.get(h).map(|e| e.ref_count),
            AssetRef::Material(h) => self.materials.get(h).map(|e| e.ref_count),
            AssetRef::Texture(h) => self.textures.get(h).map(|e| e.ref_count),
        }
    }

    pub fn dependencies(&self, asset: AssetRef) -> Option<&[AssetRef]> {
        match asset {
            AssetRef::Model(h) => self.models.get(h).map(|e| e.dependencies.as_slice()),
            AssetRef::Mesh(h) => self.meshes.get(h).map(|e| e.dependencies.as_slice()),
            AssetRef::Material(h) => self.materials.get(h).map(|e| e.dependencies.as_slice()),
            AssetRef::Texture(h) => self.textures.get(h).map(|e| e.dependencies.as_slice()),
        }
    }

    #[inline]
    pub fn model(&self, handle: ModelHandle) -> Option<&ModelAsset> {
        self.models.get(handle).map(|e| &e.desc)
    }

    #[inline]
    pub fn mesh(&self, handle: MeshHandle) -> Option<&MeshAsset> {
        self.meshes.get(handle).map(|e| &e.desc)
    }

    #[inline]
    pub fn material(&self, handle: MaterialHandle) -> Option<&MaterialAsset> {
        self.materials.get(handle).map(|e| &e.desc)
    }

    #[inline]
    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureAsset> {
        self.textures.get(handle).map(|e| &e.desc)
    }

    /// 只有被 acquire 之后才存在
    #[inline]
    pub fn gpu_mesh(&self, handle: MeshHandle) -> Option<&L::GpuMesh> {
        self.meshes.get(handle).and_then(|e| e.gpu.as_ref())
    }

    /// 只有被 acquire 之后才存在
    #[inline]
    pub fn gpu_texture(&self, handle: TextureHandle) -> Option<&L::GpuTexture> {
        self.textures.get(handle).and_then(|e| e.gpu.as_ref())
    }
}

// 引用计数
impl<L: AssetLoader> AssetRegistry<L> {
    /// 先获取所有依赖，再获取自身；失败时按相反顺序撤销本次调用中的所有获取
    pub fn acquire(&mut self, loader: &mut L, asset: impl Into<AssetRef>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("AssetRegistry::acquire");
        let asset = asset.into();

        let mut acquired = Vec::new();
        let result = self.acquire_recursive(loader, asset, &mut acquired);
        if result.is_err() {
            log::warn!("acquire {:?} failed, rolling back {} acquisitions", asset, acquired.len());
            for done in acquired.into_iter().rev() {
                self.release_single(loader, done);
            }
        }
        result
    }

    fn acquire_recursive(&mut self, loader: &mut L, asset: AssetRef, acquired: &mut Vec<AssetRef>) -> anyhow::Result<()> {
        let dependencies = self
            .dependencies(asset)
            .with_context(|| format!("{} {:?} is not registered", asset.kind(), asset))?
            .to_vec();
        for dep in dependencies {
            self.acquire_recursive(loader, dep, acquired)?;
        }

        if self.ref_count(asset) == Some(0) {
            self.load(loader, asset)?;
        }
        if let Some(ref_count) = self.ref_count_mut(asset) {
            *ref_count += 1;
        }
        acquired.push(asset);
        Ok(())
    }

    /// 先释放自身，再释放依赖
    pub fn release(&mut self, loader: &mut L, asset: impl Into<AssetRef>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("AssetRegistry::release");
        let asset = asset.into();

        let ref_count = self.ref_count(asset).with_context(|| format!("{} {:?} is not registered", asset.kind(), asset))?;
        anyhow::ensure!(ref_count > 0, "{} {:?} is released more times than acquired", asset.kind(), asset);

        self.release_single(loader, asset);
        let dependencies = self.dependencies(asset).map(<[AssetRef]>::to_vec).unwrap_or_default();
        for dep in dependencies {
            self.release(loader, dep)?;
        }
        Ok(())
    }

    /// 只减少 asset 自身的引用计数，不涉及依赖
    fn release_single(&mut self, loader: &mut L, asset: AssetRef) {
        let Some(ref_count) = self.ref_count_mut(asset) else {
            return;
        };
        *ref_count = ref_count.saturating_sub(1);
        if *ref_count == 0 {
            self.unload(loader, asset);
        }
    }

    fn ref_count_mut(&mut self, asset: AssetRef) -> Option<&mut u32> {
        match asset {
            AssetRef::Model(h) => self.models.get_mut(h).map(|e| &mut e.ref_count),
            AssetRef::Mesh(h) => self.meshes.get_mut(h).map(|e| &mut e.ref_count),
            AssetRef::Material(h) => self.materials.get_mut(h).map(|e| &mut e.ref_count),
            AssetRef::Texture(h) => self.textures.get_mut(h).map(|e| &mut e.ref_count),
        }
    }

    fn load(&mut self, loader: &mut L, asset: AssetRef) -> anyhow::Result<()> {
        match asset {
            AssetRef::Mesh(h) => {
                if let Some(entry) = self.meshes.get_mut(h) {
                    log::info!("loading mesh {}", entry.id);
                    let gpu = loader.load_mesh(&entry.id, &entry.desc).with_context(|| format!("load mesh {}", entry.id))?;
                    entry.gpu = Some(gpu);
                }
            }
            AssetRef::Texture(h) => {
                if let Some(entry) = self.textures.get_mut(h) {
                    log::info!("loading texture {}", entry.id);
                    let gpu = loader
                        .load_texture(&entry.id, &entry.desc)
                        .with_context(|| format!("load texture {}", entry.id))?;
                    entry.gpu = Some(gpu);
                }
            }
            // 没有自己的 GPU 资源
            AssetRef::Model(_) | AssetRef::Material(_) => {}
        }
        Ok(())
    }

    fn unload(&mut self, loader: &mut L, asset: AssetRef) {
        match asset {
            AssetRef::Mesh(h) => {
                if let Some(entry) = self.meshes.get_mut(h) {
                    if let Some(gpu) = entry.gpu.take() {
                        log::info!("unloading mesh {}", entry.id);
                        loader.unload_mesh(&entry.id, gpu);
                    }
                }
            }
            AssetRef::Texture(h) => {
                if let Some(entry) = self.textures.get_mut(h) {
                    if let Some(gpu) = entry.gpu.take() {
                        log::info!("unloading texture {}", entry.id);
                        loader.unload_texture(&entry.id, gpu);
                    }
                }
            }
            AssetRef::Model(_) | AssetRef::Material(_) => {}
        }
    }

    /// 卸载所有仍被引用的资产，用于关闭阶段
    pub fn unload_all(&mut self, loader: &mut L) {
        let loaded_meshes = self.meshes.keys().map(AssetRef::Mesh);
        let loaded_textures = self.textures.keys().map(AssetRef::Texture);
        let loaded = loaded_meshes.chain(loaded_textures).collect::<Vec<_>>();
        for asset in loaded {
            self.unload(loader, asset);
        }
        self.models.values_mut().for_each(|e| e.ref_count = 0);
        self.meshes.values_mut().for_each(|e| e.ref_count = 0);
        self.materials.values_mut().for_each(|e| e.ref_count = 0);
        self.textures.values_mut().for_each(|e| e.ref_count = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::Vertex;

    /// 记录加载与卸载顺序，可以让指定 id 的纹理加载失败
    #[derive(Default)]
    struct RecordingLoader {
        events: Vec<String>,
        fail_texture: Option<String>,
    }

    impl AssetLoader for RecordingLoader {
        type GpuMesh = usize;
        type GpuTexture = usize;

        fn load_mesh(&mut self, id: &str, mesh: &MeshAsset) -> anyhow::Result<usize> {
            self.events.push(format!("load {id}"));
            Ok(mesh.indices.len())
        }

        fn unload_mesh(&mut self, id: &str, _gpu_mesh: usize) {
            self.events.push(format!("unload {id}"));
        }

        fn load_texture(&mut self, id: &str, texture: &TextureAsset) -> anyhow::Result<usize> {
            anyhow::ensure!(self.fail_texture.as_deref() != Some(id), "broken texture");
            self.events.push(format!("load {id}"));
            Ok(texture.pixels.len())
        }

        fn unload_texture(&mut self, id: &str, _gpu_texture: usize) {
            self.events.push(format!("unload {id}"));
        }
    }

    fn triangle() -> MeshAsset {
        MeshAsset {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 2],
        }
    }

    fn material(texture: TextureHandle) -> MaterialAsset {
        MaterialAsset {
            color_factors: glam::Vec4::ONE,
            metal_rough_factors: glam::Vec4::ONE,
            base_color: Some(texture),
            metal_rough: None,
            normal: None,
        }
    }

    #[test]
    fn test_next_id_candidate() {
        assert_eq!(next_id_candidate("rock"), "rock_1");
        assert_eq!(next_id_candidate("rock_1"), "rock_2");
        assert_eq!(next_id_candidate("rock_09"), "rock_10");
        assert_eq!(next_id_candidate("rock_"), "rock__1");
        assert_eq!(next_id_candidate("rock_a1"), "rock_a1_1");
        assert_eq!(next_id_candidate("_5"), "_6");
    }

    #[test]
    fn test_register_makes_ids_unique_per_kind() {
        let mut registry = AssetRegistry::<RecordingLoader>::new();
        let a = registry.register_mesh("rock", triangle());
        let b = registry.register_mesh("rock", triangle());
        let c = registry.register_mesh("rock", triangle());
        let tex = registry.register_texture("rock", TextureAsset::solid([0; 4])).unwrap();

        assert_eq!(registry.id(a.into()), Some("rock"));
        assert_eq!(registry.id(b.into()), Some("rock_1"));
        assert_eq!(registry.id(c.into()), Some("rock_2"));
        // 不同种类之间不冲突
        assert_eq!(registry.id(tex.into()), Some("rock"));

        assert_eq!(registry.handle_by_id(AssetKind::Mesh, "rock_1"), Some(AssetRef::Mesh(b)));
        assert_eq!(registry.handle_by_id(AssetKind::Material, "rock"), None);
    }

    #[test]
    fn test_register_rejects_unknown_dependency() {
        let mut other = AssetRegistry::<RecordingLoader>::new();
        let foreign_texture = other.register_texture("t", TextureAsset::solid([0; 4])).unwrap();

        let mut registry = AssetRegistry::<RecordingLoader>::new();
        assert!(registry.register_material("m", material(foreign_texture)).is_err());
        assert!(registry.register_texture("bad", TextureAsset { pixels: vec![], extent: [1, 1, 1] }).is_err());
    }

    #[test]
    fn test_acquire_loads_dependencies_once() {
        let mut loader = RecordingLoader::default();
        let mut registry = AssetRegistry::new();
        let mesh = registry.register_mesh("mesh", triangle());
        let tex = registry.register_texture("tex", TextureAsset::solid([255; 4])).unwrap();
        let mat = registry.register_material("mat", material(tex)).unwrap();
        let model = registry
            .register_model(
                "model",
                ModelAsset {
                    mesh,
                    materials: vec![mat],
                },
            )
            .unwrap();

        registry.acquire(&mut loader, model).unwrap();
        registry.acquire(&mut loader, model).unwrap();
        assert_eq!(loader.events, vec!["load mesh", "load tex"]);
        assert_eq!(registry.ref_count(model.into()), Some(2));
        assert_eq!(registry.ref_count(mesh.into()), Some(2));
        assert_eq!(registry.ref_count(tex.into()), Some(2));
        assert_eq!(registry.gpu_mesh(mesh), Some(&3));

        registry.release(&mut loader, model).unwrap();
        assert_eq!(loader.events.len(), 2);

        registry.release(&mut loader, model).unwrap();
        assert_eq!(loader.events, vec!["load mesh", "load tex", "unload mesh", "unload tex"]);
        assert_eq!(registry.ref_count(tex.into()), Some(0));
        assert!(registry.gpu_mesh(mesh).is_none());

        assert!(registry.release(&mut loader, model).is_err());
    }

    #[test]
    fn test_failed_acquire_rolls_back() {
        let mut loader = RecordingLoader {
            fail_texture: Some("broken".to_string()),
            ..Default::default()
        };
        let mut registry = AssetRegistry::new();
        let mesh = registry.register_mesh("mesh", triangle());
        let good_tex = registry.register_texture("good", TextureAsset::solid([255; 4])).unwrap();
        let bad_tex = registry.register_texture("broken", TextureAsset::solid([0; 4])).unwrap();
        let good_mat = registry.register_material("good", material(good_tex)).unwrap();
        let bad_mat = registry.register_material("bad", material(bad_tex)).unwrap();
        let model = registry
            .register_model(
                "model",
                ModelAsset {
                    mesh,
                    materials: vec![good_mat, bad_mat],
                },
            )
            .unwrap();

        assert!(registry.acquire(&mut loader, model).is_err());
        assert_eq!(loader.events, vec!["load mesh", "load good", "unload good", "unload mesh"]);
        let all: [AssetRef; 6] = [
            model.into(),
            mesh.into(),
            good_tex.into(),
            bad_tex.into(),
            good_mat.into(),
            bad_mat.into(),
        ];
        for asset in all {
            assert_eq!(registry.ref_count(asset), Some(0), "{:?}", asset);
        }

        // 已经被其他资产持有的依赖不会因为回滚而卸载
        loader.events.clear();
        registry.acquire(&mut loader, good_mat).unwrap();
        assert!(registry.acquire(&mut loader, model).is_err());
        assert_eq!(loader.events, vec!["load good", "load mesh", "unload mesh"]);
        assert_eq!(registry.ref_count(good_tex.into()), Some(1));
        assert!(registry.gpu_texture(good_tex).is_some());
    }

    #[test]
    fn test_shared_texture_between_materials() {
        let mut loader = RecordingLoader::default();
        let mut registry = AssetRegistry::new();
        let tex = registry.register_texture("tex", TextureAsset::solid([1; 4])).unwrap();
        let mat_a = registry.register_material("a", material(tex)).unwrap();
        let mat_b = registry.register_material("b", material(tex)).unwrap();

        registry.acquire(&mut loader, mat_a).unwrap();
        registry.acquire(&mut loader, mat_b).unwrap();
        registry.release(&mut loader, mat_a).unwrap();
        assert_eq!(loader.events, vec!["load tex"]);

        registry.release(&mut loader, mat_b).unwrap();
        assert_eq!(loader.events, vec!["load tex", "unload tex"]);
    }

    #[test]
    fn test_unload_all() {
        let mut loader = RecordingLoader::default();
        let mut registry = AssetRegistry::new();
        let mesh = registry.register_mesh("mesh", triangle());
        registry.acquire(&mut loader, mesh).unwrap();

        registry.unload_all(&mut loader);
        assert_eq!(loader.events, vec!["load mesh", "unload mesh"]);
        assert_eq!(registry.ref_count(mesh.into()), Some(0));
    }
}
