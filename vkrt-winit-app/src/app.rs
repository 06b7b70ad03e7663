use std::{rc::Rc, time::Instant};

use anyhow::Context;
use vkrt_crate_tools::config::RendererConfig;
use vkrt_platform::{render_window::RenderWindow, window_system::WindowSystem};
use vkrt_renderer::{camera::RtCamera, frame_schedule::is_renderable_extent, renderer::Renderer};
use winit::{
    application::ApplicationHandler,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

use crate::{demo_scene::DemoScene, winit_window::WinitRenderWindow};

pub struct UserEvent;

pub struct WinitApp {
    config: RendererConfig,
    window_system: Rc<WindowSystem>,

    window: Option<WinitRenderWindow>,
    renderer: Option<Renderer>,
    scene: Option<DemoScene>,

    start_time: Instant,
    /// 事件循环中发生的致命错误，退出循环后返回给 main
    fatal_error: Option<anyhow::Error>,
}
// 总的 main 函数
impl WinitApp {
    /// 整个程序的入口
    pub fn run(config: RendererConfig) -> anyhow::Result<()> {
        let window_system = WindowSystem::init()?;
        let event_loop = EventLoop::<UserEvent>::with_user_event().build().context("failed to create event loop")?;

        let mut app = Self {
            config,
            window_system,
            window: None,
            renderer: None,
            scene: None,
            start_time: Instant::now(),
            fatal_error: None,
        };

        let loop_result = event_loop.run_app(&mut app).context("event loop");
        log::info!("end run.");

        let fatal_error = app.fatal_error.take();
        let destroy_result = app.destroy();

        // 优先返回最早发生的错误
        match (fatal_error, loop_result) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => destroy_result,
        }
    }
}
// new & init
impl WinitApp {
    /// 在 window 创建之后调用，初始化 Renderer 和场景
    fn init_after_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = Self::create_window(event_loop, &self.config)?;
        let window = WinitRenderWindow::new(window, Rc::clone(&self.window_system));

        let mut renderer = Renderer::new(&window, &self.config)?;
        let scene = match DemoScene::new(&mut renderer) {
            Ok(scene) => scene,
            Err(e) => {
                if let Err(destroy_error) = renderer.destroy() {
                    log::error!("failed to destroy renderer after scene error: {destroy_error:?}");
                }
                return Err(e);
            }
        };

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        self.start_time = Instant::now();
        Ok(())
    }

    fn create_window(event_loop: &ActiveEventLoop, config: &RendererConfig) -> anyhow::Result<Window> {
        let window_attr = Window::default_attributes()
            .with_title(config.window_title.clone())
            .with_resizable(true)
            .with_inner_size(winit::dpi::PhysicalSize::new(config.window_width, config.window_height));

        event_loop.create_window(window_attr).context("failed to create window")
    }
}
// destroy
impl WinitApp {
    /// 场景 -> 渲染器 -> 窗口 -> 窗口子系统
    fn destroy(mut self) -> anyhow::Result<()> {
        let mut result = Ok(());
        if let Some(mut renderer) = self.renderer.take() {
            if let Some(scene) = self.scene.take() {
                result = scene.destroy(&mut renderer);
            }
            let destroyed = renderer.destroy();
            result = result.and(destroyed);
        }
        self.window = None;
        drop(self.window_system);
        result
    }
}
// tools
impl WinitApp {
    fn big_update(&mut self) -> anyhow::Result<()> {
        let (Some(window), Some(renderer), Some(scene)) = (&self.window, &mut self.renderer, &self.scene) else {
            return Ok(());
        };

        scene.update(renderer, self.start_time.elapsed().as_secs_f32())?;
        renderer.update(window)?;
        Ok(())
    }

    fn on_resized(&mut self) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };
        window.mark_resized();

        let extent = window.framebuffer_extent();
        if is_renderable_extent(extent) {
            renderer.set_projection_matrix(RtCamera::default_projection(extent));
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("fatal error: {error:?}");
        self.fatal_error.get_or_insert(error);
        event_loop.exit();
    }
}
// 各种 winit 的事件处理
impl ApplicationHandler<UserEvent> for WinitApp {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {}

    // 建议在这里创建 window 和 Renderer
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("winit event: resumed");
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init_after_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, _event: UserEvent) {}

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                log::debug!("winit event: resized to {}x{}", size.width, size.height);
                self.on_resized();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.big_update() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.window().request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }

    fn memory_warning(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("memory warning");
    }
}
