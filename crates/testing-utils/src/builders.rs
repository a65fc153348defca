//! 测试数据构建器
//!
//! 以合理默认值构建流程运行、工作池与队列，按需覆盖字段。

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::models::{FlowRun, State, WorkerPool, WorkerPoolQueue};
use uuid::Uuid;

/// 流程运行构建器
pub struct FlowRunBuilder {
    run: FlowRun,
}

impl FlowRunBuilder {
    pub fn new() -> Self {
        Self {
            run: FlowRun::new("test_flow_run", State::pending()),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.run.name = name.to_string();
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.run.state = state;
        self
    }

    pub fn with_work_queue(mut self, work_queue_id: Uuid) -> Self {
        self.run.work_queue_id = Some(work_queue_id);
        self
    }

    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.run.created = created;
        self.run.updated = created;
        self
    }

    pub fn running(self) -> Self {
        self.with_state(State::running())
    }

    /// 恢复截止时间在 `ago` 之前已过的 Paused 运行
    pub fn pause_expired(self, ago: Duration) -> Self {
        self.with_state(State::paused(Some(Utc::now() - ago), false))
    }

    /// 还可在 `remaining` 内恢复的 Paused 运行
    pub fn pause_pending(self, remaining: Duration) -> Self {
        self.with_state(State::paused(Some(Utc::now() + remaining), false))
    }

    pub fn paused_without_deadline(self) -> Self {
        self.with_state(State::paused(None, false))
    }

    pub fn build(self) -> FlowRun {
        self.run
    }
}

impl Default for FlowRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构建 `count` 个创建时间严格递增的运行，顺序与批量读取一致
pub fn flow_runs(count: usize, configure: impl Fn(FlowRunBuilder) -> FlowRunBuilder) -> Vec<FlowRun> {
    let base = Utc::now() - Duration::hours(1);
    (0..count)
        .map(|i| {
            configure(
                FlowRunBuilder::new()
                    .with_name(&format!("flow_run_{i}"))
                    .created_at(base + Duration::milliseconds(i as i64)),
            )
            .build()
        })
        .collect()
}

/// 工作池构建器
pub struct WorkPoolBuilder {
    pool: WorkerPool,
}

impl WorkPoolBuilder {
    pub fn new() -> Self {
        Self {
            pool: WorkerPool::new("test_work_pool").with_type("process"),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.pool.name = name.to_string();
        self
    }

    pub fn with_type(mut self, pool_type: &str) -> Self {
        self.pool.pool_type = Some(pool_type.to_string());
        self
    }

    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.pool.concurrency_limit = Some(limit);
        self
    }

    pub fn with_base_job_template(mut self, template: serde_json::Value) -> Self {
        self.pool.base_job_template = template;
        self
    }

    pub fn paused(mut self) -> Self {
        self.pool.is_paused = true;
        self
    }

    pub fn build(self) -> WorkerPool {
        self.pool
    }
}

impl Default for WorkPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 工作队列构建器
pub struct WorkQueueBuilder {
    queue: WorkerPoolQueue,
}

impl WorkQueueBuilder {
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            queue: WorkerPoolQueue::new(pool.id, "test_queue", 10),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.queue.name = name.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.queue.priority = priority;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.queue.concurrency_limit = Some(limit);
        self
    }

    pub fn paused(mut self) -> Self {
        self.queue.is_paused = true;
        self
    }

    pub fn build(self) -> WorkerPoolQueue {
        self.queue
    }
}
