pub mod present_fence_pool;
pub mod render_present;
