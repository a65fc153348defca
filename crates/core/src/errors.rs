use thiserror::Error;
use uuid::Uuid;

use crate::models::StateType;

/// 编排控制平面错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("无效的状态转换: 运行 {run_id} 不能从 {from} 转换到 {to}")]
    InvalidTransition {
        run_id: Uuid,
        from: StateType,
        to: StateType,
    },

    #[error("流程运行未找到: {id}")]
    RunNotFound { id: Uuid },

    #[error("运行 {run_id} 已处于终态 {state}，不允许再次转换")]
    TerminalStateViolation { run_id: Uuid, state: StateType },

    #[error("存储写入冲突: {entity} {id} 已被并发修改")]
    StoreConflict { entity: &'static str, id: Uuid },

    #[error("服务 {service} 致命错误: {reason}")]
    ServiceFatal { service: String, reason: String },

    #[error("Worker池未找到: {id}")]
    WorkPoolNotFound { id: Uuid },

    #[error("Worker池队列未找到: {id}")]
    WorkPoolQueueNotFound { id: Uuid },

    #[error("无效的Worker池操作: {0}")]
    InvalidWorkPool(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// 运行已不存在，对调和过程而言不算错误
    pub fn is_benign(&self) -> bool {
        matches!(self, OrchestratorError::RunNotFound { .. })
    }

    /// 瞬时冲突，调用方应重试；事务级冲突需换新事务重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::StoreConflict { .. })
    }

    /// 程序/配置错误或基础设施故障，必须上报
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TerminalStateViolation { .. }
                | OrchestratorError::ServiceFatal { .. }
                | OrchestratorError::Database(_)
                | OrchestratorError::Internal(_)
        )
    }

    /// 事务读快照已过期或提交被拒，同一事务内重试无效
    pub fn is_transaction_conflict(&self) -> bool {
        matches!(
            self,
            OrchestratorError::StoreConflict {
                entity: "transaction",
                ..
            }
        )
    }

    pub fn run_conflict(id: Uuid) -> Self {
        OrchestratorError::StoreConflict {
            entity: "flow_run",
            id,
        }
    }

    pub fn transaction_conflict() -> Self {
        OrchestratorError::StoreConflict {
            entity: "transaction",
            id: Uuid::nil(),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let id = Uuid::new_v4();

        assert!(OrchestratorError::RunNotFound { id }.is_benign());
        assert!(!OrchestratorError::RunNotFound { id }.is_fatal());

        assert!(OrchestratorError::run_conflict(id).is_retryable());
        assert!(!OrchestratorError::run_conflict(id).is_fatal());
        assert!(!OrchestratorError::run_conflict(id).is_transaction_conflict());

        let stale = OrchestratorError::transaction_conflict();
        assert!(stale.is_retryable());
        assert!(stale.is_transaction_conflict());
        assert!(!stale.is_fatal());

        let terminal = OrchestratorError::TerminalStateViolation {
            run_id: id,
            state: StateType::Completed,
        };
        assert!(terminal.is_fatal());
        assert!(!terminal.is_retryable());

        let invalid = OrchestratorError::InvalidTransition {
            run_id: id,
            from: StateType::Scheduled,
            to: StateType::Completed,
        };
        assert!(!invalid.is_fatal());
        assert!(!invalid.is_benign());
    }

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let err = OrchestratorError::InvalidTransition {
            run_id: id,
            from: StateType::Paused,
            to: StateType::Completed,
        };
        let msg = err.to_string();
        assert!(msg.contains("PAUSED"));
        assert!(msg.contains("COMPLETED"));

        let fatal = OrchestratorError::ServiceFatal {
            service: "FailExpiredPauses".to_string(),
            reason: "数据库不可达".to_string(),
        };
        assert!(fatal.to_string().contains("FailExpiredPauses"));
    }
}
