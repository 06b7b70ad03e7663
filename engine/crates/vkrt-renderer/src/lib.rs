//! vkrt 的渲染器
//!
//! 在 [`vkrt_gfx`] 之上组织一帧的完整流程：N 个 frame slot 轮流使用，每个 slot 独占
//! command buffer、descriptor set、TLAS 以及延迟销毁队列。swapchain 的重建不会等待 GPU，
//! 旧的资源通过 present fence 决定何时销毁。

pub mod camera;
pub mod default_textures;
pub mod deletion_queue;
pub mod frame_counter;
pub mod frame_schedule;
pub mod frame_slot;
pub mod gpu_asset_loader;
pub mod gpu_mesh;
pub mod pipeline_settings;
pub mod present;
pub mod renderer;
pub mod rt_pass;
pub mod tlas_request;
