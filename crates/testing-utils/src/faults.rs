//! 面向存储的故障注入
//!
//! `FaultInjectingStore` 包装任意 `Store` 并透传所有调用，只在测试预先设置的
//! 位置注入故障。同时统计批量读取与提交次数，便于断言一轮扫描如何访问存储。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    FlowRun, FlowRunFilter, FlowRunId, State, StateType, Worker, WorkerPool, WorkerPoolQueue,
};
use orchestrator_core::traits::{Store, StoreTransaction};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use uuid::Uuid;

/// 对已设置故障的运行，`write_run_state` 的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// 如同运行已被并发推进到 Running
    InvalidTransition,
    /// 先返回指定次数的写冲突，之后放行
    Conflict { remaining: usize },
    /// 先返回指定次数的事务级冲突，如同读快照已过期
    StaleTransaction { remaining: usize },
    /// 模拟底层存储写入失败
    Unavailable,
}

#[derive(Debug, Default)]
struct Faults {
    writes: HashMap<FlowRunId, WriteFault>,
    fail_begin: bool,
    failing_commits: usize,
}

#[derive(Clone)]
pub struct FaultInjectingStore {
    inner: Arc<dyn Store>,
    faults: Arc<Mutex<Faults>>,
    select_calls: Arc<AtomicUsize>,
    selected_sizes: Arc<Mutex<Vec<usize>>>,
    commits: Arc<AtomicUsize>,
}

impl FaultInjectingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
            select_calls: Arc::new(AtomicUsize::new(0)),
            selected_sizes: Arc::new(Mutex::new(Vec::new())),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_writes_for(&self, run_id: FlowRunId, fault: WriteFault) {
        self.faults.lock().unwrap().writes.insert(run_id, fault);
    }

    /// 清除前每次 `begin_transaction` 都失败，如同存储不可达
    pub fn fail_begin(&self, fail: bool) {
        self.faults.lock().unwrap().fail_begin = fail;
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.faults.lock().unwrap().failing_commits = count;
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    /// `select_runs` 每次返回的批次大小，按调用顺序
    pub fn selected_batch_sizes(&self) -> Vec<usize> {
        self.selected_sizes.lock().unwrap().clone()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FaultInjectingStore {
    async fn begin_transaction(&self) -> OrchestratorResult<Box<dyn StoreTransaction>> {
        let fail_begin = self.faults.lock().unwrap().fail_begin;
        if fail_begin {
            return Err(OrchestratorError::Internal(
                "存储不可达（注入）".to_string(),
            ));
        }
        let inner = self.inner.begin_transaction().await?;
        Ok(Box::new(FaultInjectingTransaction {
            inner,
            store: self.clone(),
        }))
    }
}

struct FaultInjectingTransaction {
    inner: Box<dyn StoreTransaction>,
    store: FaultInjectingStore,
}

impl FaultInjectingTransaction {
    fn injected_write_fault(&self, run_id: FlowRunId, state: &State) -> Option<OrchestratorError> {
        let mut faults = self.store.faults.lock().unwrap();
        let fault = faults.writes.get_mut(&run_id)?;
        match fault {
            WriteFault::InvalidTransition => Some(OrchestratorError::InvalidTransition {
                run_id,
                from: StateType::Running,
                to: state.state_type,
            }),
            WriteFault::Conflict { remaining } if *remaining > 0 => {
                *remaining -= 1;
                Some(OrchestratorError::run_conflict(run_id))
            }
            WriteFault::Conflict { .. } => None,
            WriteFault::StaleTransaction { remaining } if *remaining > 0 => {
                *remaining -= 1;
                Some(OrchestratorError::transaction_conflict())
            }
            WriteFault::StaleTransaction { .. } => None,
            WriteFault::Unavailable => Some(OrchestratorError::Internal(
                "存储写入失败（注入）".to_string(),
            )),
        }
    }
}

#[async_trait]
impl StoreTransaction for FaultInjectingTransaction {
    async fn create_flow_run(&mut self, run: &FlowRun) -> OrchestratorResult<FlowRun> {
        self.inner.create_flow_run(run).await
    }

    async fn read_run(&mut self, id: FlowRunId) -> OrchestratorResult<Option<FlowRun>> {
        self.inner.read_run(id).await
    }

    async fn select_runs(
        &mut self,
        filter: &FlowRunFilter,
        limit: usize,
    ) -> OrchestratorResult<Vec<FlowRun>> {
        self.store.select_calls.fetch_add(1, Ordering::SeqCst);
        let runs = self.inner.select_runs(filter, limit).await?;
        self.store.selected_sizes.lock().unwrap().push(runs.len());
        Ok(runs)
    }

    async fn count_runs(&mut self, filter: &FlowRunFilter) -> OrchestratorResult<u64> {
        self.inner.count_runs(filter).await
    }

    async fn write_run_state(
        &mut self,
        id: FlowRunId,
        expected_state_id: Uuid,
        state: &State,
    ) -> OrchestratorResult<()> {
        if let Some(err) = self.injected_write_fault(id, state) {
            return Err(err);
        }
        self.inner.write_run_state(id, expected_state_id, state).await
    }

    async fn read_state(&mut self, state_id: Uuid) -> OrchestratorResult<Option<State>> {
        self.inner.read_state(state_id).await
    }

    async fn read_run_states(&mut self, run_id: FlowRunId) -> OrchestratorResult<Vec<State>> {
        self.inner.read_run_states(run_id).await
    }

    async fn create_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<WorkerPool> {
        self.inner.create_work_pool(pool).await
    }

    async fn read_work_pool(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPool>> {
        self.inner.read_work_pool(id).await
    }

    async fn read_work_pool_by_name(
        &mut self,
        name: &str,
    ) -> OrchestratorResult<Option<WorkerPool>> {
        self.inner.read_work_pool_by_name(name).await
    }

    async fn update_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<()> {
        self.inner.update_work_pool(pool).await
    }

    async fn delete_work_pool(&mut self, id: Uuid) -> OrchestratorResult<bool> {
        self.inner.delete_work_pool(id).await
    }

    async fn create_work_queue(
        &mut self,
        queue: &WorkerPoolQueue,
    ) -> OrchestratorResult<WorkerPoolQueue> {
        self.inner.create_work_queue(queue).await
    }

    async fn read_work_queue(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPoolQueue>> {
        self.inner.read_work_queue(id).await
    }

    async fn read_work_queues(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<WorkerPoolQueue>> {
        self.inner.read_work_queues(pool_id).await
    }

    async fn update_work_queue(&mut self, queue: &WorkerPoolQueue) -> OrchestratorResult<()> {
        self.inner.update_work_queue(queue).await
    }

    async fn delete_work_queue(&mut self, id: Uuid) -> OrchestratorResult<bool> {
        self.inner.delete_work_queue(id).await
    }

    async fn upsert_worker_heartbeat(
        &mut self,
        pool_id: Uuid,
        name: &str,
        heartbeat: DateTime<Utc>,
    ) -> OrchestratorResult<Worker> {
        self.inner
            .upsert_worker_heartbeat(pool_id, name, heartbeat)
            .await
    }

    async fn read_workers(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<Worker>> {
        self.inner.read_workers(pool_id).await
    }

    async fn commit(self: Box<Self>) -> OrchestratorResult<()> {
        {
            let mut faults = self.store.faults.lock().unwrap();
            if faults.failing_commits > 0 {
                faults.failing_commits -= 1;
                return Err(OrchestratorError::transaction_conflict());
            }
        }
        let this = *self;
        this.store.commits.fetch_add(1, Ordering::SeqCst);
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()> {
        let this = *self;
        this.inner.rollback().await
    }
}
