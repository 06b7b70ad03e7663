pub mod render_window;
pub mod window_system;
