pub mod render_swapchain;
pub mod surface;
