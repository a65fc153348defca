//! 测试环境辅助函数
//!
//! 创建存储、预置数据以及读取已提交状态。

use std::sync::Arc;

use orchestrator_core::config::models::DatabaseConfig;
use orchestrator_core::models::{FlowRun, FlowRunId};
use orchestrator_core::traits::Store;
use orchestrator_infrastructure::{build_store, InMemoryStore};

/// 测试环境
pub struct TestEnv;

impl TestEnv {
    pub fn memory_store() -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new())
    }

    /// 私有内存数据库上已完成迁移的 SQLite 存储
    pub async fn sqlite_store() -> Arc<dyn Store> {
        build_store(&DatabaseConfig::default())
            .await
            .expect("SQLite内存数据库初始化失败")
    }

    /// 在一个已提交的事务中插入运行
    pub async fn seed_runs(store: &dyn Store, runs: &[FlowRun]) {
        let mut tx = store.begin_transaction().await.expect("开启事务失败");
        for run in runs {
            tx.create_flow_run(run).await.expect("创建流程运行失败");
        }
        tx.commit().await.expect("提交预置运行失败");
    }

    /// 读取运行的已提交视图
    pub async fn read_run(store: &dyn Store, id: FlowRunId) -> FlowRun {
        let mut tx = store.begin_transaction().await.expect("开启事务失败");
        let run = tx
            .read_run(id)
            .await
            .expect("读取流程运行失败")
            .unwrap_or_else(|| panic!("流程运行不存在: {id}"));
        tx.rollback().await.expect("回滚失败");
        run
    }
}
