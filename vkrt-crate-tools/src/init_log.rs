use std::io::Write;

/// 初始化全局 logger
///
/// - `level`：默认的日志等级
/// - 如果设置了 `RUST_LOG` 环境变量，会在 `level` 的基础上叠加其中的规则
///
/// 重复调用只会生效一次，后续调用会输出一条警告
pub fn init_log(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = match record.level() {
                log::Level::Error => buf
                    .default_level_style(log::Level::Error)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
                log::Level::Warn => buf
                    .default_level_style(log::Level::Warn)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
                log::Level::Info => buf
                    .default_level_style(log::Level::Info)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
                other => buf.default_level_style(other),
            };
            let location_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let msg_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            // windows 与 unix 的路径分隔符都需要处理
            let file = record.file().and_then(|f| f.rsplit(['/', '\\']).next()).unwrap_or("");
            let line = record.line().unwrap_or(0);
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {location_style}[{file}:{line}]{location_style:#} \
                 {msg_style}{}{msg_style:#}",
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();

    if let Err(e) = result {
        log::warn!("logger already initialized: {e}");
    }
}

/// 将配置文件中的字符串转换为日志等级，无法识别时回退为 `Info`
pub fn parse_level(level: &str) -> log::LevelFilter {
    level.parse().unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("off"), log::LevelFilter::Off);
        assert_eq!(parse_level("not-a-level"), log::LevelFilter::Info);
    }
}
