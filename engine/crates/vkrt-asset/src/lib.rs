//! 资产层
//!
//! 资产之间的所有权关系通过显式的依赖列表记录：Model -> Mesh + Material，Material -> Texture。
//! GPU 资源的创建与销毁由 [`asset_loader::AssetLoader`] 完成，注册表本身不依赖 GPU。

pub mod asset;
pub mod asset_loader;
pub mod asset_registry;
pub mod handle;
pub mod vertex;
