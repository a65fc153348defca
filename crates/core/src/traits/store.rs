//! 存储层接口定义
//!
//! 编排核心只依赖此处定义的契约，不关心底层是 SQLite 还是内存实现：
//! - `Store` - 事务入口
//! - `StoreTransaction` - 事务内的批量读取与比较后写入操作
//!
//! ## 事务语义
//!
//! 事务句柄必须显式 `commit`；在未提交的情况下丢弃句柄等同于回滚。
//! 状态机在同一事务内"先重读后写入"，这是防止并发竞争的唯一机制，
//! `write_run_state` 以运行当前状态ID作为比较条件，条件不满足时返回
//! `StoreConflict`，调用方应重试单个操作。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use orchestrator_core::traits::Store;
//! use orchestrator_core::models::{FlowRunFilter, StateType};
//!
//! async fn paused_runs(store: &dyn Store) -> OrchestratorResult<usize> {
//!     let mut tx = store.begin_transaction().await?;
//!     let runs = tx
//!         .select_runs(&FlowRunFilter::with_state(StateType::Paused), 200)
//!         .await?;
//!     tx.commit().await?;
//!     Ok(runs.len())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{FlowRun, FlowRunFilter, FlowRunId, State, Worker, WorkerPool, WorkerPoolQueue};
use crate::OrchestratorResult;

/// 持久化存储入口
#[async_trait]
pub trait Store: Send + Sync {
    /// 开启一个事务
    async fn begin_transaction(&self) -> OrchestratorResult<Box<dyn StoreTransaction>>;
}

/// 事务内可用的存储操作
///
/// 所有读取都在事务上下文中进行，不允许跨事务缓存运行状态。
#[async_trait]
pub trait StoreTransaction: Send {
    // ---- 流程运行 ----

    /// 创建流程运行并写入其初始状态记录
    async fn create_flow_run(&mut self, run: &FlowRun) -> OrchestratorResult<FlowRun>;

    /// 读取单个流程运行，不存在时返回 None
    async fn read_run(&mut self, id: FlowRunId) -> OrchestratorResult<Option<FlowRun>>;

    /// 按条件批量读取流程运行
    ///
    /// 结果按 (created, id) 升序，同一事务内顺序稳定，可配合游标续读。
    async fn select_runs(
        &mut self,
        filter: &FlowRunFilter,
        limit: usize,
    ) -> OrchestratorResult<Vec<FlowRun>>;

    /// 统计满足条件的流程运行数量
    async fn count_runs(&mut self, filter: &FlowRunFilter) -> OrchestratorResult<u64>;

    /// 追加状态记录并将其设为运行的当前状态
    ///
    /// 仅当运行的当前状态ID仍为 `expected_state_id` 时写入，否则返回 `StoreConflict`；
    /// 运行不存在时返回 `RunNotFound`。
    async fn write_run_state(
        &mut self,
        id: FlowRunId,
        expected_state_id: Uuid,
        state: &State,
    ) -> OrchestratorResult<()>;

    /// 按ID读取一条状态记录
    async fn read_state(&mut self, state_id: Uuid) -> OrchestratorResult<Option<State>>;

    /// 读取运行的全部状态记录，按时间升序
    async fn read_run_states(&mut self, run_id: FlowRunId) -> OrchestratorResult<Vec<State>>;

    // ---- Worker池 ----

    async fn create_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<WorkerPool>;

    async fn read_work_pool(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPool>>;

    async fn read_work_pool_by_name(&mut self, name: &str)
        -> OrchestratorResult<Option<WorkerPool>>;

    async fn update_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<()>;

    /// 删除池，并在同一事务内级联删除其队列与Worker
    async fn delete_work_pool(&mut self, id: Uuid) -> OrchestratorResult<bool>;

    async fn create_work_queue(
        &mut self,
        queue: &WorkerPoolQueue,
    ) -> OrchestratorResult<WorkerPoolQueue>;

    async fn read_work_queue(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPoolQueue>>;

    /// 读取池内全部队列，按创建（插入）顺序返回
    async fn read_work_queues(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<WorkerPoolQueue>>;

    async fn update_work_queue(&mut self, queue: &WorkerPoolQueue) -> OrchestratorResult<()>;

    /// 删除队列，引用该队列的运行其 `work_queue_id` 置空
    async fn delete_work_queue(&mut self, id: Uuid) -> OrchestratorResult<bool>;

    /// 按 (池, 名称) 插入或更新Worker心跳
    async fn upsert_worker_heartbeat(
        &mut self,
        pool_id: Uuid,
        name: &str,
        heartbeat: DateTime<Utc>,
    ) -> OrchestratorResult<Worker>;

    async fn read_workers(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<Worker>>;

    // ---- 事务控制 ----

    async fn commit(self: Box<Self>) -> OrchestratorResult<()>;

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()>;
}
