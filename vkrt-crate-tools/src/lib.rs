//! vkrt 工具集
//!
//! 提供日志初始化、渲染器配置加载、基于工作区的路径管理。
//!
//! # VkrtPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # RendererConfig
//! 通过 TOML 文件配置窗口、shader 目录、同步超时等参数，缺失的字段使用默认值。

pub mod config;
pub mod init_log;
pub mod resource;
