//! 流程运行状态机
//!
//! - [`rules`] - 纯函数规则表，不依赖存储
//! - [`state_machine`] - 在调用方事务内"先重读后写入"地应用状态

pub mod rules;
pub mod state_machine;

pub use rules::{transition_rule, validate_transition, TransitionDecision, TransitionRule};
pub use state_machine::{
    set_flow_run_state, set_flow_run_state_if, OrchestrationResult, SetStateStatus,
};
