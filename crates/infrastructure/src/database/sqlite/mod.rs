pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

use std::str::FromStr;
use std::time::Duration;

use orchestrator_core::config::models::DatabaseConfig;
use orchestrator_core::OrchestratorResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{debug, info};

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        // 内存数据库随连接关闭而消失，连接不能被回收
        if config.url.contains(":memory:") {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        } else {
            pool_options = pool_options
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800)); // 30分钟默认生命周期
        }

        let pool = pool_options.connect_with(connect_options).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表结构，可重复执行
    pub async fn migrate(&self) -> OrchestratorResult<()> {
        info!("运行SQLite数据库迁移");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub type DbPool = Pool<Sqlite>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS worker_pool (
        id BLOB PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        type TEXT,
        base_job_template TEXT NOT NULL DEFAULT '{}',
        is_paused INTEGER NOT NULL DEFAULT 0,
        concurrency_limit INTEGER,
        default_queue_id BLOB,
        created TEXT NOT NULL,
        updated TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS worker_pool_queue (
        id BLOB PRIMARY KEY,
        worker_pool_id BLOB NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        is_paused INTEGER NOT NULL DEFAULT 0,
        concurrency_limit INTEGER,
        priority INTEGER NOT NULL,
        created TEXT NOT NULL,
        updated TEXT NOT NULL,
        UNIQUE (worker_pool_id, name),
        FOREIGN KEY (worker_pool_id) REFERENCES worker_pool (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS worker (
        id BLOB PRIMARY KEY,
        worker_pool_id BLOB NOT NULL,
        name TEXT NOT NULL,
        last_heartbeat_time TEXT NOT NULL,
        created TEXT NOT NULL,
        updated TEXT NOT NULL,
        UNIQUE (worker_pool_id, name),
        FOREIGN KEY (worker_pool_id) REFERENCES worker_pool (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS flow_run (
        id BLOB PRIMARY KEY,
        name TEXT NOT NULL,
        work_queue_id BLOB,
        state_id BLOB NOT NULL,
        state_type TEXT NOT NULL,
        created TEXT NOT NULL,
        updated TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS flow_run_state (
        id BLOB PRIMARY KEY,
        flow_run_id BLOB NOT NULL,
        type TEXT NOT NULL,
        name TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        message TEXT,
        details TEXT NOT NULL DEFAULT '{}',
        FOREIGN KEY (flow_run_id) REFERENCES flow_run (id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_flow_run_state_type ON flow_run (state_type, created, id)",
    "CREATE INDEX IF NOT EXISTS idx_flow_run_work_queue ON flow_run (work_queue_id)",
    "CREATE INDEX IF NOT EXISTS idx_flow_run_state_run ON flow_run_state (flow_run_id, timestamp)",
];
