use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use orchestrator_core::config::models::PauseExpirationsConfig;
use orchestrator_core::models::{FlowRun, FlowRunCursor, FlowRunFilter, State, StateType};
use orchestrator_core::traits::{Store, StoreTransaction};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::set_flow_run_state_if;

use crate::loop_service::LoopService;

/// 暂停过期后写入 Failed 状态的消息
pub const PAUSE_EXPIRED_MESSAGE: &str = "The flow was paused and never resumed.";

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_LOOP_SECONDS: f64 = 5.0;

/// 单个运行遇到写冲突时的最大尝试次数
const MAX_WRITE_ATTEMPTS: usize = 3;
/// 批次事务冲突时整批重做的最大尝试次数
const MAX_BATCH_ATTEMPTS: usize = 3;

/// 一次对账的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// 读到的 Paused 运行数
    pub examined: usize,
    /// 成功标记为 Failed 的运行数
    pub failed: usize,
    /// 截止时间未到、没有截止时间或已被删除的运行数
    pub skipped: usize,
    /// 状态写入失败的运行数
    pub errored: usize,
    /// 提交的批次数
    pub batches: usize,
}

impl PassSummary {
    fn merge(&mut self, other: &PassSummary) {
        self.examined += other.examined;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self.batches += other.batches;
    }
}

enum CandidateOutcome {
    Failed,
    Skipped,
}

struct BatchOutcome {
    summary: PassSummary,
    fetched: usize,
    last: Option<FlowRunCursor>,
}

/// 将超过恢复截止时间的 Paused 运行强制标记为 Failed
///
/// 每轮按批扫描 Paused 运行，每批一个事务。单个运行的写入失败只记录日志，
/// 不影响同批其他运行；无法开启事务、查询或提交失败时整轮返回错误。
pub struct FailExpiredPauses {
    store: Arc<dyn Store>,
    loop_interval: Duration,
    batch_size: usize,
}

impl FailExpiredPauses {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            loop_interval: Duration::from_secs_f64(DEFAULT_LOOP_SECONDS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &PauseExpirationsConfig) -> Self {
        Self::new(store)
            .with_loop_interval(Duration::from_secs_f64(config.loop_seconds))
            .with_batch_size(config.batch_size)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_loop_interval(mut self, loop_interval: Duration) -> Self {
        self.loop_interval = loop_interval;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 执行一轮完整扫描，直到某批读到的运行数少于批量大小
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn fail_expired_pauses(&self) -> OrchestratorResult<PassSummary> {
        let mut total = PassSummary::default();
        let mut cursor = None;

        loop {
            let batch = self.run_batch_with_retry(cursor).await?;
            total.merge(&batch.summary);

            if batch.fetched < self.batch_size {
                break;
            }
            cursor = batch.last;
        }

        info!(
            examined = total.examined,
            failed = total.failed,
            skipped = total.skipped,
            errored = total.errored,
            batches = total.batches,
            "暂停过期检查完成"
        );
        Ok(total)
    }

    async fn run_batch_with_retry(
        &self,
        cursor: Option<FlowRunCursor>,
    ) -> OrchestratorResult<BatchOutcome> {
        let mut attempt = 1;
        loop {
            match self.run_batch(cursor).await {
                Err(e) if e.is_retryable() && attempt < MAX_BATCH_ATTEMPTS => {
                    warn!(attempt, error = %e, "批次事务冲突，重新处理该批次");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn run_batch(&self, cursor: Option<FlowRunCursor>) -> OrchestratorResult<BatchOutcome> {
        let mut tx = self.store.begin_transaction().await?;

        let mut filter = FlowRunFilter::with_state(StateType::Paused);
        if let Some(cursor) = cursor {
            filter = filter.after(cursor);
        }
        let runs = match tx.select_runs(&filter, self.batch_size).await {
            Ok(runs) => runs,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "回滚批次事务失败");
                }
                return Err(e);
            }
        };

        let now = Utc::now();
        let mut summary = PassSummary {
            examined: runs.len(),
            batches: 1,
            ..PassSummary::default()
        };

        for run in &runs {
            let outcome = mark_flow_run_as_failed(tx.as_mut(), run, now).await;
            match outcome {
                Err(e) if e.is_transaction_conflict() => {
                    warn!(flow_run_id = %run.id, error = %e, "批次事务已失效，回滚后重做该批次");
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "回滚批次事务失败");
                    }
                    return Err(e);
                }
                Ok(CandidateOutcome::Failed) => summary.failed += 1,
                Ok(CandidateOutcome::Skipped) => summary.skipped += 1,
                Err(e) if e.is_benign() => {
                    debug!(flow_run_id = %run.id, "运行已被删除，跳过");
                    summary.skipped += 1;
                }
                Err(e @ OrchestratorError::InvalidTransition { .. })
                | Err(e @ OrchestratorError::StoreConflict { .. }) => {
                    warn!(flow_run_id = %run.id, error = %e, "运行已被其他调用方推进，跳过");
                    summary.errored += 1;
                }
                Err(e) => {
                    error!(flow_run_id = %run.id, error = %e, "标记暂停过期运行失败");
                    summary.errored += 1;
                }
            }
        }

        tx.commit().await?;
        debug!(
            examined = summary.examined,
            failed = summary.failed,
            "批次已提交"
        );

        Ok(BatchOutcome {
            summary,
            fetched: runs.len(),
            last: runs.last().map(FlowRunCursor::after),
        })
    }
}

/// 暂停已过期时强制写入 Failed，单个运行的写冲突在同一事务内重试
async fn mark_flow_run_as_failed(
    tx: &mut dyn StoreTransaction,
    run: &FlowRun,
    now: DateTime<Utc>,
) -> OrchestratorResult<CandidateOutcome> {
    if !run.state.is_pause_expired(now) {
        return Ok(CandidateOutcome::Skipped);
    }

    let mut attempt = 1;
    loop {
        let result = set_flow_run_state_if(
            tx,
            run.id,
            StateType::Paused,
            State::failed(PAUSE_EXPIRED_MESSAGE),
            true,
        )
        .await;

        match result {
            Ok(_) => {
                info!(flow_run_id = %run.id, flow_run_name = %run.name, "暂停已过期，运行标记为失败");
                return Ok(CandidateOutcome::Failed);
            }
            Err(e)
                if e.is_retryable()
                    && !e.is_transaction_conflict()
                    && attempt < MAX_WRITE_ATTEMPTS =>
            {
                debug!(flow_run_id = %run.id, attempt, "状态写入冲突，重试");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl LoopService for FailExpiredPauses {
    fn name(&self) -> &str {
        "FailExpiredPauses"
    }

    fn loop_interval(&self) -> Duration {
        self.loop_interval
    }

    async fn run_once(&self) -> OrchestratorResult<()> {
        self.fail_expired_pauses().await.map(|_| ())
    }
}
