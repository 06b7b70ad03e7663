pub mod app;
pub mod demo_scene;
pub mod winit_window;
