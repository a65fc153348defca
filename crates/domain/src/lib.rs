//! # 编排领域逻辑
//!
//! - [`orchestration`] - 流程运行状态机：纯函数规则表与事务内的状态写入
//! - [`flow_run_states`] - 状态历史查询
//! - [`work_pools`] - Worker池/队列模型：有效并发上限、队列优先级、准入判断、心跳

pub mod flow_run_states;
pub mod orchestration;
pub mod work_pools;

pub use orchestration::{
    set_flow_run_state, set_flow_run_state_if, validate_transition, OrchestrationResult,
    SetStateStatus, TransitionDecision,
};
