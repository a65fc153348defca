//! 流程运行状态历史查询

use orchestrator_core::models::{FlowRunId, State};
use orchestrator_core::traits::StoreTransaction;
use orchestrator_core::OrchestratorResult;
use uuid::Uuid;

/// 按ID读取单条状态记录
pub async fn read_flow_run_state(
    tx: &mut dyn StoreTransaction,
    state_id: Uuid,
) -> OrchestratorResult<Option<State>> {
    tx.read_state(state_id).await
}

/// 读取运行的全部状态记录，按时间升序；未知运行返回空列表
pub async fn read_flow_run_states(
    tx: &mut dyn StoreTransaction,
    run_id: FlowRunId,
) -> OrchestratorResult<Vec<State>> {
    let mut states = tx.read_run_states(run_id).await?;
    // 时间戳单调不减，排序稳定保证同一时刻的记录按写入顺序排列
    states.sort_by_key(|s| s.timestamp);
    Ok(states)
}
