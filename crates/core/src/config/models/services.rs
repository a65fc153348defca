use serde::{Deserialize, Serialize};

/// 后台调和服务配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub pause_expirations: PauseExpirationsConfig,
}

impl ServicesConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pause_expirations.validate()
    }
}

/// 暂停过期服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseExpirationsConfig {
    pub enabled: bool,
    /// 两次调和之间的间隔（秒）
    pub loop_seconds: f64,
    /// 每个事务处理的运行数量上限
    pub batch_size: usize,
    /// 是否由服务自身安装关闭信号处理器
    pub handle_signals: bool,
}

impl Default for PauseExpirationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            loop_seconds: 5.0,
            batch_size: 200,
            handle_signals: false,
        }
    }
}

impl PauseExpirationsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.loop_seconds.is_finite() || self.loop_seconds <= 0.0 {
            return Err(anyhow::anyhow!(
                "暂停过期服务循环间隔必须大于0: {}",
                self.loop_seconds
            ));
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批量大小必须大于0"));
        }

        Ok(())
    }
}

/// Worker池模型配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPoolsConfig {
    /// 超过该时长没有心跳的Worker视为离线（秒）
    pub worker_heartbeat_timeout_seconds: i64,
}

impl Default for WorkPoolsConfig {
    fn default() -> Self {
        Self {
            worker_heartbeat_timeout_seconds: 90,
        }
    }
}

impl WorkPoolsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_heartbeat_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("Worker心跳超时时间必须大于0"));
        }
        Ok(())
    }
}
