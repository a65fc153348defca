use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use orchestrator_core::config::models::AppConfig;
use orchestrator_core::models::WorkerPoolStatus;
use orchestrator_core::traits::Store;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::work_pools::read_work_pool_status;
use orchestrator_infrastructure::build_store;
use orchestrator_services::{FailExpiredPauses, LoopServiceReport, LoopServiceRunner};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

type ServiceExit = (String, OrchestratorResult<LoopServiceReport>);

/// 主应用程序
pub struct Application {
    config: AppConfig,
    store: Arc<dyn Store>,
    runners: Vec<Arc<LoopServiceRunner>>,
}

impl Application {
    /// 根据配置创建存储并注册启用的后台服务
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = build_store(&config.database)
            .await
            .with_context(|| format!("初始化存储失败: {}", config.database.url))?;
        Ok(Self::with_store(config, store))
    }

    /// 使用已有存储创建应用
    pub fn with_store(config: AppConfig, store: Arc<dyn Store>) -> Self {
        let mut runners = Vec::new();

        let pause_expirations = &config.services.pause_expirations;
        if pause_expirations.enabled {
            let service = FailExpiredPauses::from_config(store.clone(), pause_expirations);
            let runner = LoopServiceRunner::new(Arc::new(service))
                .with_signal_handling(pause_expirations.handle_signals);
            runners.push(Arc::new(runner));
        } else {
            info!("暂停过期服务已禁用");
        }

        Self {
            config,
            store,
            runners,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.runners.iter().map(|r| r.name().to_string()).collect()
    }

    /// 工作池当前状态，Worker 在线与否按配置的心跳超时判断
    pub async fn work_pool_status(&self, pool_id: Uuid) -> OrchestratorResult<WorkerPoolStatus> {
        let timeout_seconds = self.config.work_pools.worker_heartbeat_timeout_seconds;
        let mut tx = self.store.begin_transaction().await?;
        let status =
            read_work_pool_status(tx.as_mut(), pool_id, Utc::now(), timeout_seconds).await;
        if let Err(e) = tx.rollback().await {
            warn!(error = %e, "回滚只读事务失败");
        }
        status
    }

    /// 运行所有后台服务
    ///
    /// `loops` 为 `Some(n)` 时每个服务执行 n 轮后返回。收到关闭信号时向所有服务
    /// 发送停止请求并等待其退出；任一服务因错误停止时，其余服务也会被停止，
    /// 并返回该错误。
    pub async fn run(
        &self,
        loops: Option<usize>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("启动应用程序，后台服务: {:?}", self.service_names());

        let mut tasks = JoinSet::new();
        for runner in &self.runners {
            let runner = Arc::clone(runner);
            tasks.spawn(async move {
                let name = runner.name().to_string();
                (name, runner.start(loops).await)
            });
        }

        if tasks.is_empty() {
            info!("没有启用的后台服务，等待关闭信号");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        }

        let mut failure = None;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止所有后台服务");
                    self.stop_all();
                    break;
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        info!("所有后台服务已完成");
                        return Ok(());
                    };
                    if let Err(e) = service_exit(joined) {
                        failure = Some(e);
                        self.stop_all();
                        break;
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = service_exit(joined) {
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!("所有后台服务已停止");
                Ok(())
            }
        }
    }

    pub fn stop_all(&self) {
        for runner in &self.runners {
            runner.stop();
        }
    }
}

fn service_exit(joined: std::result::Result<ServiceExit, JoinError>) -> Result<()> {
    match joined {
        Ok((name, Ok(report))) => {
            info!(
                service = %name,
                iterations = report.iterations,
                stopped_by = ?report.stopped_by,
                "后台服务已退出"
            );
            Ok(())
        }
        Ok((name, Err(e))) => {
            error!(service = %name, error = %e, "后台服务因错误停止");
            Err(anyhow::Error::new(e).context(format!("后台服务 {name} 运行失败")))
        }
        Err(e) => {
            error!("后台服务任务异常: {}", e);
            Err(anyhow!("后台服务任务异常: {e}"))
        }
    }
}
