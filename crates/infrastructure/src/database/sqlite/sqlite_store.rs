use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    FlowRun, FlowRunFilter, FlowRunId, State, StateDetails, Worker, WorkerPool, WorkerPoolQueue,
};
use orchestrator_core::traits::{Store, StoreTransaction};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

const RUN_SELECT: &str = r#"
    SELECT r.id, r.name, r.work_queue_id, r.created, r.updated,
           s.id AS state_id, s.type AS state_type, s.name AS state_name,
           s.timestamp AS state_timestamp, s.message AS state_message, s.details AS state_details
    FROM flow_run r
    JOIN flow_run_state s ON s.id = r.state_id
"#;

const POOL_COLUMNS: &str = "id, name, description, type, base_job_template, is_paused, concurrency_limit, default_queue_id, created, updated";

const QUEUE_COLUMNS: &str =
    "id, worker_pool_id, name, description, is_paused, concurrency_limit, priority, created, updated";

const WORKER_COLUMNS: &str = "id, worker_pool_id, name, last_heartbeat_time, created, updated";

/// SQLite 主错误码
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// 把写锁竞争映射为事务级冲突，其余错误原样转换
///
/// 延迟事务在首次读取后建立快照，其他连接随后提交会让本事务的写入返回
/// SQLITE_BUSY_SNAPSHOT（扩展码 517，主码为 BUSY），只能换新事务重做。
fn lock_conflict(err: sqlx::Error) -> OrchestratorError {
    let contended = match &err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    };
    if contended {
        debug!(error = %err, "SQLite写锁竞争，事务需要重做");
        OrchestratorError::transaction_conflict()
    } else {
        err.into()
    }
}

/// 基于 sqlx 的 SQLite 存储
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接池需已完成迁移
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin_transaction(&self) -> OrchestratorResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteStoreTransaction { tx }))
    }
}

/// SQLite 事务句柄，丢弃时由 sqlx 自动回滚
pub struct SqliteStoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteStoreTransaction {
    fn row_to_state(row: &SqliteRow, prefix: &str) -> OrchestratorResult<State> {
        let column = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}{name}")
            }
        };
        let details: String = row.try_get(column("details").as_str())?;
        let details: StateDetails = serde_json::from_str(&details)?;

        Ok(State {
            id: row.try_get(column("id").as_str())?,
            state_type: row.try_get(column("type").as_str())?,
            name: row.try_get(column("name").as_str())?,
            timestamp: row.try_get(column("timestamp").as_str())?,
            message: row.try_get(column("message").as_str())?,
            details,
        })
    }

    fn row_to_flow_run(row: &SqliteRow) -> OrchestratorResult<FlowRun> {
        Ok(FlowRun {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            work_queue_id: row.try_get("work_queue_id")?,
            state: Self::row_to_state(row, "state_")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }

    fn row_to_work_pool(row: &SqliteRow) -> OrchestratorResult<WorkerPool> {
        let template: String = row.try_get("base_job_template")?;
        Ok(WorkerPool {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            pool_type: row.try_get("type")?,
            base_job_template: serde_json::from_str(&template)?,
            is_paused: row.try_get("is_paused")?,
            concurrency_limit: row.try_get("concurrency_limit")?,
            default_queue_id: row.try_get("default_queue_id")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }

    fn row_to_work_queue(row: &SqliteRow) -> OrchestratorResult<WorkerPoolQueue> {
        Ok(WorkerPoolQueue {
            id: row.try_get("id")?,
            worker_pool_id: row.try_get("worker_pool_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            is_paused: row.try_get("is_paused")?,
            concurrency_limit: row.try_get("concurrency_limit")?,
            priority: row.try_get("priority")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }

    fn row_to_worker(row: &SqliteRow) -> OrchestratorResult<Worker> {
        Ok(Worker {
            id: row.try_get("id")?,
            worker_pool_id: row.try_get("worker_pool_id")?,
            name: row.try_get("name")?,
            last_heartbeat_time: row.try_get("last_heartbeat_time")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &FlowRunFilter) {
        qb.push(" WHERE 1 = 1");

        if let Some(types) = &filter.state_types {
            if types.is_empty() {
                qb.push(" AND 0 = 1");
            } else {
                qb.push(" AND r.state_type IN (");
                let mut separated = qb.separated(", ");
                for state_type in types {
                    separated.push_bind(*state_type);
                }
                separated.push_unseparated(")");
            }
        }

        if let Some(queue_ids) = &filter.work_queue_ids {
            if queue_ids.is_empty() {
                qb.push(" AND 0 = 1");
            } else {
                qb.push(" AND r.work_queue_id IN (");
                let mut separated = qb.separated(", ");
                for queue_id in queue_ids {
                    separated.push_bind(*queue_id);
                }
                separated.push_unseparated(")");
            }
        }

        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                qb.push(" AND 0 = 1");
            } else {
                qb.push(" AND r.id IN (");
                let mut separated = qb.separated(", ");
                for id in ids {
                    separated.push_bind(*id);
                }
                separated.push_unseparated(")");
            }
        }

        if let Some(cursor) = &filter.after {
            qb.push(" AND (r.created > ")
                .push_bind(cursor.created)
                .push(" OR (r.created = ")
                .push_bind(cursor.created)
                .push(" AND r.id > ")
                .push_bind(cursor.id)
                .push("))");
        }
    }

    async fn insert_state(&mut self, run_id: FlowRunId, state: &State) -> OrchestratorResult<()> {
        let details = serde_json::to_string(&state.details)?;
        sqlx::query(
            r#"
            INSERT INTO flow_run_state (id, flow_run_id, type, name, timestamp, message, details)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.id)
        .bind(run_id)
        .bind(state.state_type)
        .bind(&state.name)
        .bind(state.timestamp)
        .bind(&state.message)
        .bind(details)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for SqliteStoreTransaction {
    #[instrument(skip(self, run), fields(flow_run_id = %run.id))]
    async fn create_flow_run(&mut self, run: &FlowRun) -> OrchestratorResult<FlowRun> {
        sqlx::query(
            r#"
            INSERT INTO flow_run (id, name, work_queue_id, state_id, state_type, created, updated)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id)
        .bind(&run.name)
        .bind(run.work_queue_id)
        .bind(run.state.id)
        .bind(run.state.state_type)
        .bind(run.created)
        .bind(run.updated)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;

        self.insert_state(run.id, &run.state).await?;
        debug!("创建流程运行: {}", run.name);
        Ok(run.clone())
    }

    async fn read_run(&mut self, id: FlowRunId) -> OrchestratorResult<Option<FlowRun>> {
        let row = sqlx::query(&format!("{RUN_SELECT} WHERE r.id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(Self::row_to_flow_run).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn select_runs(
        &mut self,
        filter: &FlowRunFilter,
        limit: usize,
    ) -> OrchestratorResult<Vec<FlowRun>> {
        let mut qb = QueryBuilder::<Sqlite>::new(RUN_SELECT);
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY r.created, r.id LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = qb.build().fetch_all(&mut *self.tx).await?;
        rows.iter().map(Self::row_to_flow_run).collect()
    }

    async fn count_runs(&mut self, filter: &FlowRunFilter) -> OrchestratorResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM flow_run r");
        Self::push_filter(&mut qb, filter);

        let row = qb.build().fetch_one(&mut *self.tx).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, state), fields(flow_run_id = %id, state = %state.state_type))]
    async fn write_run_state(
        &mut self,
        id: FlowRunId,
        expected_state_id: Uuid,
        state: &State,
    ) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE flow_run
            SET state_id = ?, state_type = ?, updated = ?
            WHERE id = ? AND state_id = ?
            "#,
        )
        .bind(state.id)
        .bind(state.state_type)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_state_id)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM flow_run WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?
                .is_some();
            return Err(if exists {
                OrchestratorError::run_conflict(id)
            } else {
                OrchestratorError::RunNotFound { id }
            });
        }

        self.insert_state(id, state).await
    }

    async fn read_state(&mut self, state_id: Uuid) -> OrchestratorResult<Option<State>> {
        let row = sqlx::query(
            "SELECT id, type, name, timestamp, message, details FROM flow_run_state WHERE id = ?",
        )
        .bind(state_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(|r| Self::row_to_state(r, "")).transpose()
    }

    async fn read_run_states(&mut self, run_id: FlowRunId) -> OrchestratorResult<Vec<State>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, name, timestamp, message, details
            FROM flow_run_state
            WHERE flow_run_id = ?
            ORDER BY timestamp, rowid
            "#,
        )
        .bind(run_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(|r| Self::row_to_state(r, "")).collect()
    }

    async fn create_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<WorkerPool> {
        let template = serde_json::to_string(&pool.base_job_template)?;
        sqlx::query(&format!(
            "INSERT INTO worker_pool ({POOL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(pool.id)
        .bind(&pool.name)
        .bind(&pool.description)
        .bind(&pool.pool_type)
        .bind(template)
        .bind(pool.is_paused)
        .bind(pool.concurrency_limit)
        .bind(pool.default_queue_id)
        .bind(pool.created)
        .bind(pool.updated)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;
        Ok(pool.clone())
    }

    async fn read_work_pool(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPool>> {
        let row = sqlx::query(&format!("SELECT {POOL_COLUMNS} FROM worker_pool WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(Self::row_to_work_pool).transpose()
    }

    async fn read_work_pool_by_name(
        &mut self,
        name: &str,
    ) -> OrchestratorResult<Option<WorkerPool>> {
        let row = sqlx::query(&format!(
            "SELECT {POOL_COLUMNS} FROM worker_pool WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(Self::row_to_work_pool).transpose()
    }

    async fn update_work_pool(&mut self, pool: &WorkerPool) -> OrchestratorResult<()> {
        let template = serde_json::to_string(&pool.base_job_template)?;
        let result = sqlx::query(
            r#"
            UPDATE worker_pool
            SET name = ?, description = ?, type = ?, base_job_template = ?, is_paused = ?,
                concurrency_limit = ?, default_queue_id = ?, updated = ?
            WHERE id = ?
            "#,
        )
        .bind(&pool.name)
        .bind(&pool.description)
        .bind(&pool.pool_type)
        .bind(template)
        .bind(pool.is_paused)
        .bind(pool.concurrency_limit)
        .bind(pool.default_queue_id)
        .bind(pool.updated)
        .bind(pool.id)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::WorkPoolNotFound { id: pool.id });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(work_pool_id = %id))]
    async fn delete_work_pool(&mut self, id: Uuid) -> OrchestratorResult<bool> {
        sqlx::query(
            r#"
            UPDATE flow_run SET work_queue_id = NULL
            WHERE work_queue_id IN (SELECT id FROM worker_pool_queue WHERE worker_pool_id = ?)
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;
        sqlx::query("DELETE FROM worker WHERE worker_pool_id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(lock_conflict)?;
        sqlx::query("DELETE FROM worker_pool_queue WHERE worker_pool_id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(lock_conflict)?;
        let result = sqlx::query("DELETE FROM worker_pool WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(lock_conflict)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_work_queue(
        &mut self,
        queue: &WorkerPoolQueue,
    ) -> OrchestratorResult<WorkerPoolQueue> {
        sqlx::query(&format!(
            "INSERT INTO worker_pool_queue ({QUEUE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(queue.id)
        .bind(queue.worker_pool_id)
        .bind(&queue.name)
        .bind(&queue.description)
        .bind(queue.is_paused)
        .bind(queue.concurrency_limit)
        .bind(queue.priority)
        .bind(queue.created)
        .bind(queue.updated)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;
        Ok(queue.clone())
    }

    async fn read_work_queue(&mut self, id: Uuid) -> OrchestratorResult<Option<WorkerPoolQueue>> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM worker_pool_queue WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(Self::row_to_work_queue).transpose()
    }

    async fn read_work_queues(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<WorkerPoolQueue>> {
        // rowid 即插入顺序
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM worker_pool_queue WHERE worker_pool_id = ? ORDER BY rowid"
        ))
        .bind(pool_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(Self::row_to_work_queue).collect()
    }

    async fn update_work_queue(&mut self, queue: &WorkerPoolQueue) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE worker_pool_queue
            SET name = ?, description = ?, is_paused = ?, concurrency_limit = ?, priority = ?, updated = ?
            WHERE id = ?
            "#,
        )
        .bind(&queue.name)
        .bind(&queue.description)
        .bind(queue.is_paused)
        .bind(queue.concurrency_limit)
        .bind(queue.priority)
        .bind(queue.updated)
        .bind(queue.id)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::WorkPoolQueueNotFound { id: queue.id });
        }
        Ok(())
    }

    async fn delete_work_queue(&mut self, id: Uuid) -> OrchestratorResult<bool> {
        sqlx::query("UPDATE flow_run SET work_queue_id = NULL WHERE work_queue_id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(lock_conflict)?;
        sqlx::query("UPDATE worker_pool SET default_queue_id = NULL WHERE default_queue_id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(lock_conflict)?;
        let result = sqlx::query("DELETE FROM worker_pool_queue WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(lock_conflict)?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_worker_heartbeat(
        &mut self,
        pool_id: Uuid,
        name: &str,
        heartbeat: DateTime<Utc>,
    ) -> OrchestratorResult<Worker> {
        let now = Utc::now();
        sqlx::query(&format!(
            r#"
            INSERT INTO worker ({WORKER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (worker_pool_id, name) DO UPDATE SET
                last_heartbeat_time = MAX(worker.last_heartbeat_time, excluded.last_heartbeat_time),
                updated = excluded.updated
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(pool_id)
        .bind(name)
        .bind(heartbeat)
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(lock_conflict)?;

        let row = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM worker WHERE worker_pool_id = ? AND name = ?"
        ))
        .bind(pool_id)
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;
        Self::row_to_worker(&row)
    }

    async fn read_workers(&mut self, pool_id: Uuid) -> OrchestratorResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM worker WHERE worker_pool_id = ? ORDER BY rowid"
        ))
        .bind(pool_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn commit(self: Box<Self>) -> OrchestratorResult<()> {
        let this = *self;
        this.tx.commit().await.map_err(lock_conflict)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
