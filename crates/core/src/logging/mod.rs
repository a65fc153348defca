//! 日志初始化
//!
//! 所有组件通过 `tracing` 宏输出结构化日志，进程入口调用一次 [`init_logging`]。
//! `RUST_LOG` 环境变量优先于配置中的级别。

pub mod log_config;
pub mod log_level;

pub use log_config::{LogConfig, LogFormat};
pub use log_level::LogLevel;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{OrchestratorError, OrchestratorResult};

/// 初始化全局日志订阅者
///
/// 重复初始化返回 `Configuration` 错误，不会 panic。
pub fn init_logging(config: &LogConfig) -> OrchestratorResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Configuration(format!("初始化日志系统失败: {e}")))
}
