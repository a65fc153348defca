use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use orchestrator::app::Application;
use orchestrator::shutdown::ShutdownManager;
use orchestrator_core::config::models::AppConfig;
use orchestrator_core::logging::{init_logging, LogConfig};
use orchestrator_services::shutdown_signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("工作流编排控制平面")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时使用内置默认值和环境变量"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"]),
        )
        .arg(
            Arg::new("loops")
                .long("loops")
                .value_name("N")
                .help("每个后台服务执行 N 轮后退出")
                .value_parser(clap::value_parser!(usize)),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let loops = matches.get_one::<usize>("loops").copied();

    // 加载配置
    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    // 初始化日志系统，命令行参数优先
    let log_config = resolve_log_config(
        &config,
        matches.get_one::<String>("log-level").map(String::as_str),
        matches.get_one::<String>("log-format").map(String::as_str),
    )?;
    init_logging(&log_config).context("初始化日志系统失败")?;

    info!("启动工作流编排控制平面");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(loops, shutdown_rx).await })
    };

    // 服务自行结束（执行次数用尽或致命错误）或收到关闭信号
    let outcome = tokio::select! {
        joined = &mut app_handle => Some(joined),
        _ = shutdown_signal() => None,
    };

    let result = match outcome {
        Some(joined) => joined.context("应用任务异常退出")?,
        None => {
            info!("收到关闭信号，开始优雅关闭...");
            match shutdown_manager.shutdown_and_wait(app_handle).await {
                Some(result) => result,
                None => {
                    error!("部分后台服务未能在宽限期内退出");
                    Ok(())
                }
            }
        }
    };

    match &result {
        Ok(()) => info!("工作流编排控制平面已退出"),
        Err(e) => error!("应用运行失败: {e:#}"),
    }
    result
}

fn resolve_log_config(
    config: &AppConfig,
    level: Option<&str>,
    format: Option<&str>,
) -> Result<LogConfig> {
    let mut log_config = config.observability.log_config();
    if let Some(level) = level {
        log_config.level = level.parse().context("无效的日志级别")?;
    }
    if let Some(format) = format {
        log_config.format = format.parse().context("无效的日志格式")?;
    }
    Ok(log_config)
}
