use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::signals::shutdown_signal;

/// 周期性对账服务
///
/// 实现者只提供一次对账逻辑，调度节奏、停止与失败处理由 [`LoopServiceRunner`] 负责。
/// `run_once` 返回错误表示服务已无法继续，运行器会停止整个循环。
#[async_trait]
pub trait LoopService: Send + Sync {
    /// 服务名称，用于日志与错误
    fn name(&self) -> &str;

    /// 相邻两次 `run_once` 开始时刻之间的目标间隔
    fn loop_interval(&self) -> Duration;

    /// 执行一次对账
    async fn run_once(&self) -> OrchestratorResult<()>;

    /// 第一次 `run_once` 之前调用
    async fn on_start(&self) -> OrchestratorResult<()> {
        Ok(())
    }

    /// 循环结束后调用，无论结束原因
    async fn on_stop(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// 循环结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 达到调用方指定的执行次数
    LoopLimit,
    /// 收到停止请求或关闭信号
    StopSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopServiceReport {
    /// 成功完成的 `run_once` 次数
    pub iterations: usize,
    pub stopped_by: StopReason,
}

/// 从其他任务请求停止循环
#[derive(Debug, Clone)]
pub struct LoopServiceHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl LoopServiceHandle {
    /// 请求停止；正在执行的 `run_once` 会先完成，之后不再开始新的一轮
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// 循环服务运行器
pub struct LoopServiceRunner {
    service: Arc<dyn LoopService>,
    handle_signals: bool,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl LoopServiceRunner {
    pub fn new(service: Arc<dyn LoopService>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            service,
            handle_signals: false,
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// 由运行器自身监听 Ctrl+C / SIGTERM 并触发停止
    pub fn with_signal_handling(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn handles_signals(&self) -> bool {
        self.handle_signals
    }

    pub fn handle(&self) -> LoopServiceHandle {
        LoopServiceHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    /// 运行循环
    ///
    /// `loops` 为 `Some(n)` 时恰好执行 n 次 `run_once` 后返回，最后一次之后不再等待；
    /// 为 `None` 时一直运行到停止。每轮结束后等待 `间隔 - 本轮耗时`，耗时超过间隔时
    /// 立即开始下一轮。`run_once` 失败时记录错误并以 `ServiceFatal` 返回。
    pub async fn start(&self, loops: Option<usize>) -> OrchestratorResult<LoopServiceReport> {
        let name = self.service.name().to_string();
        let interval = self.service.loop_interval();
        let mut stop_rx = self.stop_tx.subscribe();

        info!(
            service = %name,
            interval_ms = interval.as_millis() as u64,
            loops = ?loops,
            "启动循环服务"
        );

        let signal_task = self.spawn_signal_listener();

        let result = match self.service.on_start().await {
            Ok(()) => self.run_loop(&name, interval, loops, &mut stop_rx).await,
            Err(e) => {
                error!(service = %name, error = %e, "循环服务启动钩子失败");
                Err(OrchestratorError::ServiceFatal {
                    service: name.clone(),
                    reason: e.to_string(),
                })
            }
        };

        // 监听任务在 start 返回前结束，不再持有停止通道
        if let Some(task) = signal_task {
            task.abort();
            let _ = task.await;
        }

        if let Err(e) = self.service.on_stop().await {
            warn!(service = %name, error = %e, "循环服务停止钩子失败");
        }

        match &result {
            Ok(report) => info!(
                service = %name,
                iterations = report.iterations,
                stopped_by = ?report.stopped_by,
                "循环服务已停止"
            ),
            Err(_) => error!(service = %name, "循环服务因错误停止"),
        }

        result
    }

    async fn run_loop(
        &self,
        name: &str,
        interval: Duration,
        loops: Option<usize>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> OrchestratorResult<LoopServiceReport> {
        let mut iterations = 0;

        loop {
            let stop_requested = *stop_rx.borrow_and_update();
            if stop_requested {
                info!(service = %name, "收到停止信号，退出循环");
                return Ok(LoopServiceReport {
                    iterations,
                    stopped_by: StopReason::StopSignal,
                });
            }
            if loops.is_some_and(|limit| iterations >= limit) {
                return Ok(LoopServiceReport {
                    iterations,
                    stopped_by: StopReason::LoopLimit,
                });
            }

            let started = Instant::now();
            if let Err(e) = self.service.run_once().await {
                error!(
                    service = %name,
                    iteration = iterations + 1,
                    error = %e,
                    "循环服务执行失败，停止服务"
                );
                return Err(OrchestratorError::ServiceFatal {
                    service: name.to_string(),
                    reason: e.to_string(),
                });
            }
            iterations += 1;

            if loops.is_some_and(|limit| iterations >= limit) {
                continue;
            }

            let elapsed = started.elapsed();
            let wait = interval.saturating_sub(elapsed);
            if wait.is_zero() {
                warn!(
                    service = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "本轮耗时超过循环间隔，立即开始下一轮"
                );
                continue;
            }

            debug!(service = %name, wait_ms = wait.as_millis() as u64, "等待下一轮");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => {}
            }
        }
    }

    fn spawn_signal_listener(&self) -> Option<JoinHandle<()>> {
        if !self.handle_signals {
            return None;
        }
        let handle = self.handle();
        let name = self.service.name().to_string();
        Some(tokio::spawn(async move {
            shutdown_signal().await;
            info!(service = %name, "收到关闭信号，请求停止循环服务");
            handle.stop();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        interval: Duration,
    }

    #[async_trait]
    impl LoopService for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn loop_interval(&self) -> Duration {
            self.interval
        }

        async fn run_once(&self) -> OrchestratorResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_loops_never_runs() {
        let service = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            interval: Duration::from_secs(1),
        });
        let runner = LoopServiceRunner::new(service.clone());

        let report = runner.start(Some(0)).await.unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.stopped_by, StopReason::LoopLimit);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_is_honored() {
        let service = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            interval: Duration::from_secs(1),
        });
        let runner = LoopServiceRunner::new(service.clone());
        let handle = runner.handle();
        handle.stop();
        assert!(handle.is_stop_requested());

        let report = runner.start(None).await.unwrap();
        assert_eq!(report.stopped_by, StopReason::StopSignal);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_listener_honours_stop_and_is_released() {
        let service = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            interval: Duration::from_secs(1),
        });
        let runner = Arc::new(LoopServiceRunner::new(service.clone()).with_signal_handling(true));
        assert!(runner.handles_signals());

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.start(None).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        runner.stop();

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.stopped_by, StopReason::StopSignal);
        assert!(report.iterations >= 1);
        assert_eq!(report.iterations, service.calls.load(Ordering::SeqCst));
        // 只剩运行器自身持有停止通道，监听任务已被回收
        assert_eq!(Arc::strong_count(&runner.stop_tx), 1);
    }
}
