//! vkrt 的 Vulkan 抽象层
//!
//! 提供对 Vulkan API 的封装：设备管理、内存分配、命令缓冲、同步原语、交换链、
//! 加速结构、光追管线与 SBT、描述符。
//! 所有核心 Vulkan 对象通过 [`gfx::Gfx`] 单例统一管理，简化生命周期和借用关系。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod foundation;
pub mod gfx;
pub mod gfx_core;
pub mod pipelines;
pub mod raytracing;
pub mod resources;
pub mod swapchain;
