use std::fmt::Display;

use slotmap::new_key_type;

new_key_type! { pub struct ModelHandle; }
new_key_type! { pub struct MeshHandle; }
new_key_type! { pub struct MaterialHandle; }
new_key_type! { pub struct TextureHandle; }

/// 资产的种类，每种资产都有一张独立的表，id 在同一种类中唯一
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Model,
    Mesh,
    Material,
    Texture,
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Mesh => write!(f, "mesh"),
            Self::Material => write!(f, "material"),
            Self::Texture => write!(f, "texture"),
        }
    }
}

/// 带种类标签的资产句柄，用于依赖列表以及引用计数表
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AssetRef {
    Model(ModelHandle),
    Mesh(MeshHandle),
    Material(MaterialHandle),
    Texture(TextureHandle),
}

impl AssetRef {
    #[inline]
    pub fn kind(&self) -> AssetKind {
        match self {
            Self::Model(_) => AssetKind::Model,
            Self::Mesh(_) => AssetKind::Mesh,
            Self::Material(_) => AssetKind::Material,
            Self::Texture(_) => AssetKind::Texture,
        }
    }
}

impl From<ModelHandle> for AssetRef {
    fn from(handle: ModelHandle) -> Self {
        Self::Model(handle)
    }
}

impl From<MeshHandle> for AssetRef {
    fn from(handle: MeshHandle) -> Self {
        Self::Mesh(handle)
    }
}

impl From<MaterialHandle> for AssetRef {
    fn from(handle: MaterialHandle) -> Self {
        Self::Material(handle)
    }
}

impl From<TextureHandle> for AssetRef {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}
