use std::sync::Arc;

use orchestrator_core::config::models::DatabaseConfig;
use orchestrator_core::traits::Store;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tracing::info;

use super::sqlite::{DatabaseManager, SqliteStore};
use crate::in_memory_store::InMemoryStore;

/// 存储类型检测
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Sqlite,
    InMemory,
}

impl StoreType {
    pub fn from_url(url: &str) -> OrchestratorResult<Self> {
        if url == orchestrator_core::config::models::IN_MEMORY_STORE_URL {
            Ok(StoreType::InMemory)
        } else if url.starts_with("sqlite:") {
            Ok(StoreType::Sqlite)
        } else {
            Err(OrchestratorError::Configuration(format!(
                "不支持的数据库URL: {url}"
            )))
        }
    }
}

/// 根据数据库配置构建存储
pub async fn build_store(config: &DatabaseConfig) -> OrchestratorResult<Arc<dyn Store>> {
    match StoreType::from_url(&config.url)? {
        StoreType::InMemory => {
            info!("使用内存存储");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreType::Sqlite => {
            let manager = DatabaseManager::new(config).await?;
            manager.migrate().await?;
            info!(url = %config.url, "使用SQLite存储");
            Ok(Arc::new(SqliteStore::new(manager.pool().clone())))
        }
    }
}
