use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let config = VkrtPath::config_path("vkrt.toml");           // vkrt.toml
/// let shader = VkrtPath::shader_build_path("ray-tracing");   // shader/.build/ray-tracing.spv
/// ```
pub struct VkrtPath {}
// 核心路径
impl VkrtPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    }
}
// 根目录下
impl VkrtPath {
    /// 工作区根目录下的配置文件
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join(filename)
    }

    pub fn shader_root_path() -> PathBuf {
        Self::workspace_path().join("shader")
    }

    /// 获取 `shader/.build/` 目录，存放编译后的 SPIR-V
    pub fn shader_build_dir() -> PathBuf {
        Self::shader_root_path().join(".build")
    }

    /// 获取 `shader/.build/` 目录下的着色器路径，自动追加 `.spv` 后缀
    pub fn shader_build_path(name: &str) -> PathBuf {
        Self::shader_build_dir().join(format!("{name}.spv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_build_path_has_spv_suffix() {
        let path = VkrtPath::shader_build_path("ray-tracing");
        assert_eq!(path.file_name().and_then(|f| f.to_str()), Some("ray-tracing.spv"));
        assert!(path.starts_with(VkrtPath::shader_root_path()));
    }
}
