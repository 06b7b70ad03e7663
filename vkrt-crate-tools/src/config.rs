use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::resource::VkrtPath;

/// 渲染器的运行时配置，对应工作区根目录下的 `vkrt.toml`
///
/// 所有字段都有默认值，配置文件中只需要写需要覆盖的部分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// 传给 VkApplicationInfo 的应用名称
    pub app_name: String,

    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,

    /// 存放 `ray-tracing.spv` 的目录
    pub shader_dir: PathBuf,

    /// 是否请求 `VK_LAYER_KHRONOS_validation`
    pub enable_validation: bool,

    /// present fence 池的容量上限，超出后会等待最久未使用的 fence
    pub max_present_fences: usize,

    /// 等待 frame fence 的超时时间（纳秒），超时视为设备丢失
    pub frame_timeout_ns: u64,

    /// 等待一次性提交（上传、BLAS 构建）的超时时间（纳秒）
    pub immediate_timeout_ns: u64,

    /// 默认的日志等级，`RUST_LOG` 会在此基础上叠加
    pub log_level: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "vkrt-app".to_string(),
            window_title: "vkrt".to_string(),
            window_width: 1280,
            window_height: 720,
            shader_dir: VkrtPath::shader_build_dir(),
            enable_validation: cfg!(debug_assertions),
            max_present_fences: 8,
            frame_timeout_ns: 1_000_000_000,
            immediate_timeout_ns: 10_000_000_000,
            log_level: "info".to_string(),
        }
    }
}

impl RendererConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content).with_context(|| format!("failed to parse config file: {:?}", path.as_ref()))
    }

    /// 文件不存在时返回默认配置；文件存在但内容非法时返回错误
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::info!("config file {:?} not found, using defaults", path.as_ref());
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: RendererConfig = toml::from_str(content).context("invalid renderer config")?;

        // 相对路径以工作区根目录为基准
        if config.shader_dir.is_relative() {
            config.shader_dir = VkrtPath::workspace_path().join(&config.shader_dir);
        }
        anyhow::ensure!(config.max_present_fences > 0, "max_present_fences must be at least 1");
        anyhow::ensure!(config.window_width > 0 && config.window_height > 0, "window size must be non-zero");

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            window_width = 800
            max_present_fences = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.window_width, 800);
        assert_eq!(config.max_present_fences, 4);
        assert_eq!(config.window_height, RendererConfig::default().window_height);
        assert_eq!(config.frame_timeout_ns, 1_000_000_000);
    }

    #[test]
    fn test_relative_shader_dir_is_rooted_at_workspace() {
        let config = RendererConfig::from_toml_str(r#"shader_dir = "my-shaders""#).unwrap();
        assert_eq!(config.shader_dir, VkrtPath::workspace_path().join("my-shaders"));
    }

    #[test]
    fn test_zero_fence_cap_is_rejected() {
        assert!(RendererConfig::from_toml_str("max_present_fences = 0").is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = RendererConfig::load_or_default("definitely/not/here/vkrt.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
