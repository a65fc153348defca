use std::str::FromStr;

use crate::errors::OrchestratorError;
use crate::logging::log_level::LogLevel;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Output format for logs
    pub format: LogFormat,
}

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(OrchestratorError::Configuration(format!(
                "不支持的日志格式: {s}"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel, format: LogFormat) -> Self {
        Self { level, format }
    }

    /// 从字符串形式的级别和格式构造，通常来自命令行参数
    pub fn parse(level: &str, format: &str) -> Result<Self, OrchestratorError> {
        Ok(Self {
            level: level.parse()?,
            format: format.parse()?,
        })
    }
}
