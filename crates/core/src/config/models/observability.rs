use serde::{Deserialize, Serialize};

use crate::logging::{LogConfig, LogFormat, LogLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ObservabilityConfig {
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level, self.log_format)
    }
}
