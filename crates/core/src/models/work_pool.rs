use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 每个Worker池创建时自带的默认队列名称
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Worker池：命名的容量域，包含队列和Worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPool {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// 执行环境标签
    #[serde(rename = "type")]
    pub pool_type: Option<String>,
    /// 透传给Worker的作业模板，控制平面不解释其内容
    pub base_job_template: serde_json::Value,
    pub is_paused: bool,
    /// None 表示该层级不限并发
    pub concurrency_limit: Option<u32>,
    pub default_queue_id: Option<Uuid>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            pool_type: None,
            base_job_template: serde_json::json!({}),
            is_paused: false,
            concurrency_limit: None,
            default_queue_id: None,
            created: now,
            updated: now,
        }
    }

    pub fn with_type(mut self, pool_type: impl Into<String>) -> Self {
        self.pool_type = Some(pool_type.into());
        self
    }

    pub fn with_concurrency_limit(mut self, limit: Option<u32>) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn paused(mut self, is_paused: bool) -> Self {
        self.is_paused = is_paused;
        self
    }
}

/// Worker池队列：池内的优先级通道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolQueue {
    pub id: Uuid,
    pub worker_pool_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_paused: bool,
    pub concurrency_limit: Option<u32>,
    /// 数值越小越先被服务
    pub priority: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl WorkerPoolQueue {
    pub fn new(worker_pool_id: Uuid, name: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            worker_pool_id,
            name: name.into(),
            description: None,
            is_paused: false,
            concurrency_limit: None,
            priority,
            created: now,
            updated: now,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: Option<u32>) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn paused(mut self, is_paused: bool) -> Self {
        self.is_paused = is_paused;
        self
    }
}

/// 已注册的执行进程，以 (池, 名称) 唯一标识
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub worker_pool_id: Uuid,
    pub name: String,
    pub last_heartbeat_time: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Worker {
    pub fn new(worker_pool_id: Uuid, name: impl Into<String>, heartbeat: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_pool_id,
            name: name.into(),
            last_heartbeat_time: heartbeat,
            created: heartbeat,
            updated: heartbeat,
        }
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        (now - self.last_heartbeat_time).num_seconds() > timeout_seconds
    }
}

/// Worker池状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "NOT_READY")]
    NotReady,
    #[serde(rename = "PAUSED")]
    Paused,
}
