//! 内存存储实现
//!
//! 适用于嵌入式部署和测试。事务采用乐观并发控制：
//! - 开启事务时复制一份已提交数据作为工作副本，事务内的读写都作用在副本上
//! - 写入同时记录到操作日志，提交时在已提交数据上重放并重新校验比较条件
//! - `write_run_state` 在写入时就与已提交数据比较，尽早返回 `StoreConflict`
//!
//! 未提交即丢弃的事务不会留下任何影响。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    FlowRun, FlowRunFilter, FlowRunId, State, Worker, WorkerPool, WorkerPoolQueue,
};
use orchestrator_core::traits::{Store, StoreTransaction};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StateRecord {
    flow_run_id: FlowRunId,
    state: State,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    runs: HashMap<FlowRunId, FlowRun>,
    states: HashMap<Uuid, StateRecord>,
    /// 每个运行的状态记录ID，按写入顺序
    history: HashMap<FlowRunId, Vec<Uuid>>,
    pools: HashMap<Uuid, WorkerPool>,
    /// 按插入顺序保存
    queues: Vec<WorkerPoolQueue>,
    workers: Vec<Worker>,
}

#[derive(Debug, Clone)]
enum Operation {
    CreateRun(FlowRun),
    WriteState {
        run_id: FlowRunId,
        expected_state_id: Uuid,
        state: State,
        at: DateTime<Utc>,
    },
    CreatePool(WorkerPool),
    UpdatePool(WorkerPool),
    DeletePool(Uuid),
    CreateQueue(WorkerPoolQueue),
    UpdateQueue(WorkerPoolQueue),
    DeleteQueue(Uuid),
    Heartbeat {
        worker_id: Uuid,
        pool_id: Uuid,
        name: String,
        heartbeat: DateTime<Utc>,
        at: DateTime<Utc>,
    },
}

impl Tables {
    fn apply(&mut self, op: &Operation) -> OrchestratorResult<()> {
        match op {
            Operation::CreateRun(run) => {
                if self.runs.contains_key(&run.id) {
                    return Err(OrchestratorError::Internal(format!(
                        "流程运行已存在: {}",
                        run.id
                    )));
                }
                self.push_state(run.id, run.state.clone());
                self.runs.insert(run.id, run.clone());
            }
            Operation::WriteState {
                run_id,
                expected_state_id,
                state,
                at,
            } => {
                let run = self
                    .runs
                    .get_mut(run_id)
                    .ok_or(OrchestratorError::RunNotFound { id: *run_id })?;
                if run.state.id != *expected_state_id {
                    return Err(OrchestratorError::run_conflict(*run_id));
                }
                run.state = state.clone();
                run.updated = *at;
                self.push_state(*run_id, state.clone());
            }
            Operation::CreatePool(pool) => {
                if self.pools.values().any(|p| p.name == pool.name) {
                    return Err(OrchestratorError::InvalidWorkPool(format!(
                        "Worker池名称已存在: {}",
                        pool.name
                    )));
                }
                self.pools.insert(pool.id, pool.clone());
            }
            Operation::UpdatePool(pool) => {
                let slot = self
                    .pools
                    .get_mut(&pool.id)
                    .ok_or(OrchestratorError::WorkPoolNotFound { id: pool.id })?;
                *slot = pool.clone();
            }
            Operation::DeletePool(id) => {
                if self.pools.remove(id).is_some() {
                    let queue_ids: Vec<Uuid> = self
                        .queues
                        .iter()
                        .filter(|q| q.worker_pool_id == *id)
                        .map(|q| q.id)
                        .collect();
                    for queue_id in &queue_ids {
                        self.detach_queue(*queue_id);
                    }
                    self.queues.retain(|q| q.worker_pool_id != *id);
                    self.workers.retain(|w| w.worker_pool_id != *id);
                }
            }
            Operation::CreateQueue(queue) => {
                if !self.pools.contains_key(&queue.worker_pool_id) {
                    return Err(OrchestratorError::WorkPoolNotFound {
                        id: queue.worker_pool_id,
                    });
                }
                if self
                    .queues
                    .iter()
                    .any(|q| q.worker_pool_id == queue.worker_pool_id && q.name == queue.name)
                {
                    return Err(OrchestratorError::InvalidWorkPool(format!(
                        "队列名称在池内已存在: {}",
                        queue.name
                    )));
                }
                self.queues.push(queue.clone());
            }
            Operation::UpdateQueue(queue) => {
                let slot = self
                    .queues
                    .iter_mut()
                    .find(|q| q.id == queue.id)
                    .ok_or(OrchestratorError::WorkPoolQueueNotFound { id: queue.id })?;
                *slot = queue.clone();
            }
            Operation::DeleteQueue(id) => {
                self.detach_queue(*id);
                for pool in self.pools.values_mut() {
                    if pool.default_queue_id == Some(*id) {
                        pool.default_queue_id = None;
                    }
                }
                self.queues.retain(|q| q.id != *id);
            }
            Operation::Heartbeat {
                worker_id,
                pool_id,
                name,
                heartbeat,
                at,
            } => {
                if !self.pools.contains_key(pool_id) {
                    return Err(OrchestratorError::WorkPoolNotFound { id: *pool_id });
                }
                match self
                    .workers
                    .iter_mut()
                    .find(|w| w.worker_pool_id == *pool_id && w.name == *name)
                {
                    Some(worker) => {
                        // 心跳时间不回退
                        if *heartbeat > worker.last_heartbeat_time {
                            worker.last_heartbeat_time = *heartbeat;
                        }
                        worker.updated = *at;
                    }
                    None => {
                        self.workers.push(Worker {
                            id: *worker_id,
                            worker_pool_id: *pool_id,
                            name: name.clone(),
                            last_heartbeat_time: *heartbeat,
                            created: *at,
                            updated: *at,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn push_state(&mut self, run_id: FlowRunId, state: State) {
        self.history.entry(run_id).or_default().push(state.id);
        self.states.insert(
            state.id,
            StateRecord {
                flow_run_id: run_id,
                state,
            },
        );
    }

    /// 引用该队列的运行 `work_queue_id` 置空
    fn detach_queue(&mut self, queue_id: Uuid) {
        for run in self.runs.values_mut() {
            if run.work_queue_id == Some(queue_id) {
                run.work_queue_id = None;
            }
        }
    }

    /// 从已提交数据刷新单个运行及其状态历史
    fn refresh_run(&mut self, committed: &Tables, run_id: FlowRunId) {
        match committed.runs.get(&run_id) {
            Some(run) => {
                self.runs.insert(run_id, run.clone());
            }
            None => {
                self.runs.remove(&run_id);
            }
        }
        if let Some(ids) = committed.history.get(&run_id) {
            for id in ids {
                if let Some(record) = committed.states.get(id) {
                    self.states.insert(*id, record.clone());
                }
            }
            self.history.insert(run_id, ids.clone());
        }
    }
}

fn poisoned<T>(_: T) -> OrchestratorError {
    OrchestratorError::Internal("内存存储锁已损坏".to_string())
}

/// 内存存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    committed: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin_transaction(&self) -> OrchestratorResult<Box<dyn StoreTransaction>> {
        let snapshot = self.committed.read().map_err(poisoned)?.clone();
        Ok(Box::new(InMemoryTransaction {
            committed: Arc::clone(&self.committed),
            working: snapshot,
            journal: Vec::new(),
        }))
    }
}

pub struct InMemoryTransaction {
    committed: Arc<RwLock<Tables>>,
    working: Tables,
    journal: Vec<Operation>,
}

impl InMemoryTransaction {
    /// 先作用于工作副本，成功后记入操作日志
    fn record(&mut self, op: Operation) -> OrchestratorResult<()> {
        self.working.apply(&op)?;
        self.journal.push(op);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn create_flow_run(&mut self, run: &FlowRun) -> OrchestratorResult<FlowRun> {
        self.record(Operation::CreateRun(run.clone()))?;
        Ok(run.clone())
    }

    async fn read_run(&mut self, id: FlowRunId) -> OrchestratorResult<Option<FlowRun>> {
        Ok(self.working.runs.get(&id).cloned())
    }

    async fn select_runs(
        &mut self,
        filter: &FlowRunFilter,
        limit: usize,
    ) -> OrchestratorResult<Vec<FlowRun>> {
        let mut runs: Vec<&FlowRun> = self
            .working
            .runs
            .values()
            .filter(|run| filter.matches(run))
            .collect();
        runs.sort_by_key(|run| (run.created, run.id));
        Ok(runs.into_iter().take(limit).cloned().collect())
    }

    async fn count_runs(&mut self, filter: &FlowRunFilter) -> OrchestratorResult<u64> {
        Ok(self
            .working
            .runs
            .values()
            .filter(|run| filter.matches(run))
            .count() as u64)
    }

    async fn write_run_state(
        &mut self,
        id: FlowRunId,
        expected_state_id: Uuid,
        state: &State,
    ) -> OrchestratorResult<()> {
        {
            let committed = self.committed.read().map_err(poisoned)?;
            // 工作副本中由本事务写入的状态尚未提交，只比较未被本事务改动过的运行
            let touched = self.journal.iter().any(|op| match op {
                Operation::WriteState { run_id, .. } => *run_id == id,
                Operation::CreateRun(run) => run.id == id,
                _ => false,
            });
            if !touched {
                if let Some(current) = committed.runs.get(&id) {
                    if current.state.id != expected_state_id {
                        debug!(flow_run_id = %id, "检测到并发提交，刷新运行数据");
                        self.working.refresh_run(&committed, id);
                        return Err(OrchestratorError::run_conflict(id));
                    }
                }
            }
        }

        self.record(Operation::WriteState {
            run_id: id,
            expected_state_id,
            state: state.clone(),
            at: Utc::now(),
        })
    }

    async fn read_state(&mut self, state_id: Uuid) -> OrchestratorResult<Option<State>> {
        Ok(self
            .working
            .states
            .get(&state_id)
            .map(|record| record.state.clone()))
    }

    async fn read_run_states(&mut self, run_id: FlowRunId) -> OrchestratorResult<Vec<State>> {
        let Some(ids) = self.working.history.get(&run_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.working.states.get(id))
            .filter(|record| record.flow_run_id == run_id)
            .map(|record| record.state.clone())
            .collect())
    }

    async fn create_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<WorkerPool> {
        self.record(Operation::CreatePool(pool.clone()))?;
        Ok(pool.clone())
    }

    async fn read_work_pool(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPool>> {
        Ok(self.working.pools.get(&id).cloned())
    }

    async fn read_work_pool_by_name(
        &mut self,
        name: &str,
    ) -> OrchestratorResult<Option<WorkerPool>> {
        Ok(self
            .working
            .pools
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn update_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<()> {
        self.record(Operation::UpdatePool(pool.clone()))
    }

    async fn delete_work_pool(&mut self, id: Uuid) -> OrchestratorResult<bool> {
        if !self.working.pools.contains_key(&id) {
            return Ok(false);
        }
        self.record(Operation::DeletePool(id))?;
        Ok(true)
    }

    async fn create_work_queue(
        &mut self,
        queue: &WorkerPoolQueue,
    ) -> OrchestratorResult<WorkerPoolQueue> {
        self.record(Operation::CreateQueue(queue.clone()))?;
        Ok(queue.clone())
    }

    async fn read_work_queue(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPoolQueue>> {
        Ok(self.working.queues.iter().find(|q| q.id == id).cloned())
    }

    async fn read_work_queues(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<WorkerPoolQueue>> {
        Ok(self
            .working
            .queues
            .iter()
            .filter(|q| q.worker_pool_id == pool_id)
            .cloned()
            .collect())
    }

    async fn update_work_queue(&mut self, queue: &WorkerPoolQueue) -> OrchestratorResult<()> {
        self.record(Operation::UpdateQueue(queue.clone()))
    }

    async fn delete_work_queue(&mut self, id: Uuid) -> OrchestratorResult<bool> {
        if !self.working.queues.iter().any(|q| q.id == id) {
            return Ok(false);
        }
        self.record(Operation::DeleteQueue(id))?;
        Ok(true)
    }

    async fn upsert_worker_heartbeat(
        &mut self,
        pool_id: Uuid,
        name: &str,
        heartbeat: DateTime<Utc>,
    ) -> OrchestratorResult<Worker> {
        self.record(Operation::Heartbeat {
            worker_id: Uuid::new_v4(),
            pool_id,
            name: name.to_string(),
            heartbeat,
            at: Utc::now(),
        })?;
        self.working
            .workers
            .iter()
            .find(|w| w.worker_pool_id == pool_id && w.name == name)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("Worker心跳写入后未找到: {name}")))
    }

    async fn read_workers(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<Worker>> {
        Ok(self
            .working
            .workers
            .iter()
            .filter(|w| w.worker_pool_id == pool_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> OrchestratorResult<()> {
        let this = *self;
        if this.journal.is_empty() {
            return Ok(());
        }

        let mut committed = this.committed.write().map_err(poisoned)?;
        let mut next = committed.clone();
        for op in &this.journal {
            next.apply(op)?;
        }
        *committed = next;

        debug!(operations = this.journal.len(), "内存事务已提交");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()> {
        Ok(())
    }
}
