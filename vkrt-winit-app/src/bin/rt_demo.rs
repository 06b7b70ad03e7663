use vkrt_crate_tools::{
    config::RendererConfig,
    init_log::{init_log, parse_level},
    resource::VkrtPath,
};
use vkrt_winit_app::app::WinitApp;

fn main() -> anyhow::Result<()> {
    let config = RendererConfig::load_or_default(VkrtPath::config_path("vkrt.toml"))?;
    init_log(parse_level(&config.log_level));
    tracy_client::Client::start();
    tracy_client::set_thread_name!("MainThread");

    WinitApp::run(config)
}
