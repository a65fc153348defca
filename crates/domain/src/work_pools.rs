//! Worker池/队列模型
//!
//! 这里只定义容量与优先级的计算方式和管理操作，不实现准入算法本身：
//! 外部调度路径组合 [`effective_concurrency_limit`]、[`ordered_queues`]
//! 和 [`admission_decision`] 来决定哪些运行可以开始执行。

use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    Worker, WorkerPool, WorkerPoolQueue, WorkerPoolStatus, DEFAULT_QUEUE_NAME,
};
use orchestrator_core::traits::StoreTransaction;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// 默认队列的优先级
pub const DEFAULT_QUEUE_PRIORITY: i32 = 1;

/// 限制所在的层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    Pool,
    Queue,
}

/// 准入判断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionDecision {
    Admit,
    /// 池或队列已暂停，与并发余量无关
    Paused { scope: LimitScope },
    AtCapacity { scope: LimitScope, limit: u32 },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admit)
    }
}

/// 队列的有效并发上限：池与队列上限的较小值，两者都未设置时为 None（不限）
pub fn effective_concurrency_limit(pool: &WorkerPool, queue: &WorkerPoolQueue) -> Option<u32> {
    match (pool.concurrency_limit, queue.concurrency_limit) {
        (Some(p), Some(q)) => Some(p.min(q)),
        (Some(p), None) => Some(p),
        (None, Some(q)) => Some(q),
        (None, None) => None,
    }
}

/// 按优先级升序排列队列，优先级相同时保持传入顺序
///
/// 传入顺序应为创建顺序，`StoreTransaction::read_work_queues` 保证这一点。
pub fn ordered_queues(mut queues: Vec<WorkerPoolQueue>) -> Vec<WorkerPoolQueue> {
    queues.sort_by_key(|q| q.priority);
    queues
}

/// 判断一个运行能否进入 Running
///
/// 暂停是绝对门控，先于并发余量检查；池级计数与池上限比较，队列级计数与队列上限比较。
pub fn admission_decision(
    pool: &WorkerPool,
    queue: &WorkerPoolQueue,
    running_in_pool: u32,
    running_in_queue: u32,
) -> AdmissionDecision {
    if pool.is_paused {
        return AdmissionDecision::Paused {
            scope: LimitScope::Pool,
        };
    }
    if queue.is_paused {
        return AdmissionDecision::Paused {
            scope: LimitScope::Queue,
        };
    }
    if let Some(limit) = pool.concurrency_limit {
        if running_in_pool >= limit {
            return AdmissionDecision::AtCapacity {
                scope: LimitScope::Pool,
                limit,
            };
        }
    }
    if let Some(limit) = queue.concurrency_limit {
        if running_in_queue >= limit {
            return AdmissionDecision::AtCapacity {
                scope: LimitScope::Queue,
                limit,
            };
        }
    }
    AdmissionDecision::Admit
}

pub fn is_worker_online(worker: &Worker, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
    !worker.is_heartbeat_expired(now, timeout_seconds)
}

/// 池状态：暂停优先；至少一个在线Worker为 Ready，否则 NotReady
pub fn work_pool_status(
    pool: &WorkerPool,
    workers: &[Worker],
    now: DateTime<Utc>,
    timeout_seconds: i64,
) -> WorkerPoolStatus {
    if pool.is_paused {
        return WorkerPoolStatus::Paused;
    }
    if workers
        .iter()
        .any(|w| is_worker_online(w, now, timeout_seconds))
    {
        WorkerPoolStatus::Ready
    } else {
        WorkerPoolStatus::NotReady
    }
}

// ---- 事务内的管理操作 ----

/// 创建Worker池，并在同一事务内创建其默认队列
pub async fn create_work_pool(
    tx: &mut dyn StoreTransaction,
    pool: WorkerPool,
) -> OrchestratorResult<WorkerPool> {
    if pool.name.trim().is_empty() {
        return Err(OrchestratorError::InvalidWorkPool(
            "Worker池名称不能为空".to_string(),
        ));
    }
    if tx.read_work_pool_by_name(&pool.name).await?.is_some() {
        return Err(OrchestratorError::InvalidWorkPool(format!(
            "Worker池名称已存在: {}",
            pool.name
        )));
    }

    let mut pool = tx.create_work_pool(&pool).await?;
    let default_queue = WorkerPoolQueue::new(pool.id, DEFAULT_QUEUE_NAME, DEFAULT_QUEUE_PRIORITY);
    let default_queue = tx.create_work_queue(&default_queue).await?;

    pool.default_queue_id = Some(default_queue.id);
    tx.update_work_pool(&pool).await?;

    info!(work_pool = %pool.name, work_pool_id = %pool.id, "创建Worker池");
    Ok(pool)
}

/// 在池内创建队列，名称在池内唯一
pub async fn create_work_pool_queue(
    tx: &mut dyn StoreTransaction,
    queue: WorkerPoolQueue,
) -> OrchestratorResult<WorkerPoolQueue> {
    if tx.read_work_pool(queue.worker_pool_id).await?.is_none() {
        return Err(OrchestratorError::WorkPoolNotFound {
            id: queue.worker_pool_id,
        });
    }
    let existing = tx.read_work_queues(queue.worker_pool_id).await?;
    if existing.iter().any(|q| q.name == queue.name) {
        return Err(OrchestratorError::InvalidWorkPool(format!(
            "队列名称在池内已存在: {}",
            queue.name
        )));
    }

    let queue = tx.create_work_queue(&queue).await?;
    debug!(work_queue = %queue.name, priority = queue.priority, "创建Worker池队列");
    Ok(queue)
}

/// 修改池的默认队列，队列必须属于同一个池
pub async fn set_default_queue(
    tx: &mut dyn StoreTransaction,
    pool_id: Uuid,
    queue_id: Uuid,
) -> OrchestratorResult<WorkerPool> {
    let mut pool = tx
        .read_work_pool(pool_id)
        .await?
        .ok_or(OrchestratorError::WorkPoolNotFound { id: pool_id })?;
    let queue = tx
        .read_work_queue(queue_id)
        .await?
        .ok_or(OrchestratorError::WorkPoolQueueNotFound { id: queue_id })?;

    if queue.worker_pool_id != pool.id {
        return Err(OrchestratorError::InvalidWorkPool(format!(
            "队列 {} 不属于Worker池 {}",
            queue.name, pool.name
        )));
    }

    pool.default_queue_id = Some(queue.id);
    pool.updated = Utc::now();
    tx.update_work_pool(&pool).await?;
    Ok(pool)
}

/// 删除队列；默认队列只能随池一起删除
pub async fn delete_work_queue(
    tx: &mut dyn StoreTransaction,
    queue_id: Uuid,
) -> OrchestratorResult<bool> {
    let Some(queue) = tx.read_work_queue(queue_id).await? else {
        return Ok(false);
    };
    if let Some(pool) = tx.read_work_pool(queue.worker_pool_id).await? {
        if pool.default_queue_id == Some(queue.id) {
            return Err(OrchestratorError::InvalidWorkPool(format!(
                "不能删除Worker池 {} 的默认队列",
                pool.name
            )));
        }
    }
    tx.delete_work_queue(queue_id).await
}

/// 删除池，其队列与Worker在同一事务内级联删除
pub async fn delete_work_pool(tx: &mut dyn StoreTransaction, pool_id: Uuid) -> OrchestratorResult<bool> {
    let deleted = tx.delete_work_pool(pool_id).await?;
    if deleted {
        info!(work_pool_id = %pool_id, "删除Worker池");
    }
    Ok(deleted)
}

/// 记录Worker心跳；存储层保证心跳时间不回退
pub async fn worker_heartbeat(
    tx: &mut dyn StoreTransaction,
    pool_id: Uuid,
    worker_name: &str,
    at: DateTime<Utc>,
) -> OrchestratorResult<Worker> {
    if tx.read_work_pool(pool_id).await?.is_none() {
        return Err(OrchestratorError::WorkPoolNotFound { id: pool_id });
    }
    tx.upsert_worker_heartbeat(pool_id, worker_name, at).await
}

pub async fn read_ordered_queues(
    tx: &mut dyn StoreTransaction,
    pool_id: Uuid,
) -> OrchestratorResult<Vec<WorkerPoolQueue>> {
    Ok(ordered_queues(tx.read_work_queues(pool_id).await?))
}

pub async fn read_effective_concurrency_limit(
    tx: &mut dyn StoreTransaction,
    queue_id: Uuid,
) -> OrchestratorResult<Option<u32>> {
    let queue = tx
        .read_work_queue(queue_id)
        .await?
        .ok_or(OrchestratorError::WorkPoolQueueNotFound { id: queue_id })?;
    let pool = tx
        .read_work_pool(queue.worker_pool_id)
        .await?
        .ok_or(OrchestratorError::WorkPoolNotFound {
            id: queue.worker_pool_id,
        })?;
    Ok(effective_concurrency_limit(&pool, &queue))
}

pub async fn read_work_pool_status(
    tx: &mut dyn StoreTransaction,
    pool_id: Uuid,
    now: DateTime<Utc>,
    timeout_seconds: i64,
) -> OrchestratorResult<WorkerPoolStatus> {
    let pool = tx
        .read_work_pool(pool_id)
        .await?
        .ok_or(OrchestratorError::WorkPoolNotFound { id: pool_id })?;
    let workers = tx.read_workers(pool_id).await?;
    Ok(work_pool_status(&pool, &workers, now, timeout_seconds))
}
