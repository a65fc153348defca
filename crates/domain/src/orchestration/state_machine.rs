use orchestrator_core::models::{FlowRunId, State, StateType};
use orchestrator_core::traits::StoreTransaction;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tracing::{debug, warn};

use super::rules::{validate_transition, TransitionDecision};

/// 状态写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetStateStatus {
    /// 已写入新的状态记录
    Accepted,
    /// 提议与当前状态等价，未写入
    NoOp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationResult {
    pub status: SetStateStatus,
    /// 运行在本次调用后的当前状态
    pub state: State,
}

impl OrchestrationResult {
    pub fn is_accepted(&self) -> bool {
        self.status == SetStateStatus::Accepted
    }
}

/// 在给定事务内设置流程运行状态
///
/// 每次调用都会在事务内重读运行的当前状态，不使用任何缓存：
/// - 运行不存在 → `RunNotFound`
/// - 与当前状态等价 → `NoOp`，记录与时间戳保持不变
/// - 当前为终态 → `TerminalStateViolation`，`force` 也不能绕过
/// - `force = false` 且规则表不允许 → `InvalidTransition`
///
/// 写入以重读到的状态ID作为比较条件，并发写入者只有一个能成功，
/// 失败方收到 `StoreConflict`，应重试这一次调用。
pub async fn set_flow_run_state(
    tx: &mut dyn StoreTransaction,
    run_id: FlowRunId,
    state: State,
    force: bool,
) -> OrchestratorResult<OrchestrationResult> {
    apply_state(tx, run_id, None, state, force).await
}

/// 与 [`set_flow_run_state`] 相同，但要求重读到的状态类型仍为 `expected`
///
/// 类型已变化时返回 `InvalidTransition`，即使 `force = true`。
/// 供对账服务使用：候选运行在选出之后可能已被其他调用方推进。
pub async fn set_flow_run_state_if(
    tx: &mut dyn StoreTransaction,
    run_id: FlowRunId,
    expected: StateType,
    state: State,
    force: bool,
) -> OrchestratorResult<OrchestrationResult> {
    apply_state(tx, run_id, Some(expected), state, force).await
}

async fn apply_state(
    tx: &mut dyn StoreTransaction,
    run_id: FlowRunId,
    expected: Option<StateType>,
    mut state: State,
    force: bool,
) -> OrchestratorResult<OrchestrationResult> {
    let run = tx
        .read_run(run_id)
        .await?
        .ok_or(OrchestratorError::RunNotFound { id: run_id })?;
    let current = run.state;

    if let Some(expected) = expected {
        if current.state_type != expected {
            debug!(
                flow_run_id = %run_id,
                expected = %expected,
                actual = %current.state_type,
                "运行状态已被并发修改"
            );
            return Err(OrchestratorError::InvalidTransition {
                run_id,
                from: current.state_type,
                to: state.state_type,
            });
        }
    }

    match validate_transition(&current, &state, force) {
        TransitionDecision::NoOp => {
            debug!(flow_run_id = %run_id, state = %current.state_type, "状态未变化，忽略重复提议");
            return Ok(OrchestrationResult {
                status: SetStateStatus::NoOp,
                state: current,
            });
        }
        TransitionDecision::TerminalViolation => {
            warn!(
                flow_run_id = %run_id,
                current = %current.state_type,
                proposed = %state.state_type,
                force,
                "拒绝离开终态的转换"
            );
            return Err(OrchestratorError::TerminalStateViolation {
                run_id,
                state: current.state_type,
            });
        }
        TransitionDecision::Reject => {
            return Err(OrchestratorError::InvalidTransition {
                run_id,
                from: current.state_type,
                to: state.state_type,
            });
        }
        TransitionDecision::Accept => {}
    }

    // 时间戳单调不减
    if state.timestamp < current.timestamp {
        state.timestamp = current.timestamp;
    }

    tx.write_run_state(run_id, current.id, &state).await?;

    debug!(
        flow_run_id = %run_id,
        from = %current.state_type,
        to = %state.state_type,
        force,
        "流程运行状态已更新"
    );

    Ok(OrchestrationResult {
        status: SetStateStatus::Accepted,
        state,
    })
}
