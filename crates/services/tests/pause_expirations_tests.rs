use std::sync::Arc;

use chrono::Duration;
use orchestrator_core::models::StateType;
use orchestrator_core::traits::Store;
use orchestrator_core::OrchestratorError;
use orchestrator_services::{
    FailExpiredPauses, LoopService, LoopServiceRunner, PassSummary, PAUSE_EXPIRED_MESSAGE,
};
use orchestrator_testing_utils::{flow_runs, FaultInjectingStore, FlowRunBuilder, TestEnv, WriteFault};

fn expired(count: usize) -> Vec<orchestrator_core::models::FlowRun> {
    flow_runs(count, |b| b.pause_expired(Duration::minutes(10)))
}

async fn assert_failed_by_expiration(store: &dyn Store, run_id: uuid::Uuid) {
    let run = TestEnv::read_run(store, run_id).await;
    assert_eq!(run.state_type(), StateType::Failed);
    assert_eq!(run.state.message.as_deref(), Some(PAUSE_EXPIRED_MESSAGE));
}

#[tokio::test]
async fn test_expired_pauses_fail_in_bounded_batches() {
    let inner = TestEnv::memory_store();
    let runs = expired(450);
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    let service = FailExpiredPauses::new(Arc::new(store.clone()));
    assert_eq!(service.batch_size(), 200);

    let summary = service.fail_expired_pauses().await.unwrap();

    assert_eq!(store.selected_batch_sizes(), vec![200, 200, 50]);
    assert_eq!(store.commits(), 3);
    assert_eq!(
        summary,
        PassSummary {
            examined: 450,
            failed: 450,
            skipped: 0,
            errored: 0,
            batches: 3,
        }
    );
    for run in &runs {
        assert_failed_by_expiration(inner.as_ref(), run.id).await;
    }
}

#[tokio::test]
async fn test_exact_multiple_of_batch_size_reads_one_empty_batch() {
    let inner = TestEnv::memory_store();
    TestEnv::seed_runs(inner.as_ref(), &expired(4)).await;

    let store = FaultInjectingStore::new(inner);
    let service = FailExpiredPauses::new(Arc::new(store.clone())).with_batch_size(2);

    let summary = service.fail_expired_pauses().await.unwrap();
    assert_eq!(store.selected_batch_sizes(), vec![2, 2, 0]);
    assert_eq!(summary.failed, 4);
}

#[tokio::test]
async fn test_unexpired_and_open_ended_pauses_are_left_alone() {
    let store = TestEnv::memory_store();
    let pending = FlowRunBuilder::new()
        .pause_pending(Duration::minutes(10))
        .build();
    let open_ended = FlowRunBuilder::new().paused_without_deadline().build();
    let running = FlowRunBuilder::new().running().build();
    let due = FlowRunBuilder::new()
        .pause_expired(Duration::seconds(1))
        .build();
    TestEnv::seed_runs(
        store.as_ref(),
        &[pending.clone(), open_ended.clone(), running.clone(), due.clone()],
    )
    .await;

    let summary = FailExpiredPauses::new(store.clone())
        .fail_expired_pauses()
        .await
        .unwrap();

    assert_eq!(summary.examined, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(
        TestEnv::read_run(store.as_ref(), pending.id).await.state,
        pending.state
    );
    assert_eq!(
        TestEnv::read_run(store.as_ref(), open_ended.id).await.state,
        open_ended.state
    );
    assert_eq!(
        TestEnv::read_run(store.as_ref(), running.id).await.state_type(),
        StateType::Running
    );
    assert_failed_by_expiration(store.as_ref(), due.id).await;
}

#[tokio::test]
async fn test_unexpired_runs_beyond_batch_boundary_do_not_stall_pass() {
    let inner = TestEnv::memory_store();
    let mut runs = flow_runs(5, |b| b.pause_pending(Duration::hours(1)));
    let late = expired(1).remove(0);
    runs.push(late.clone());
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    let summary = FailExpiredPauses::new(Arc::new(store.clone()))
        .with_batch_size(2)
        .fail_expired_pauses()
        .await
        .unwrap();

    assert_eq!(store.selected_batch_sizes(), vec![2, 2, 2, 0]);
    assert_eq!(summary.examined, 6);
    assert_eq!(summary.failed, 1);
    assert_failed_by_expiration(inner.as_ref(), late.id).await;
}

#[tokio::test]
async fn test_one_failing_candidate_does_not_abort_the_batch() {
    let inner = TestEnv::memory_store();
    let runs = expired(5);
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    store.fail_writes_for(runs[1].id, WriteFault::InvalidTransition);
    store.fail_writes_for(runs[3].id, WriteFault::Unavailable);

    let summary = FailExpiredPauses::new(Arc::new(store.clone()))
        .fail_expired_pauses()
        .await
        .unwrap();

    assert_eq!(summary.examined, 5);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.errored, 2);
    for index in [0, 2, 4] {
        assert_failed_by_expiration(inner.as_ref(), runs[index].id).await;
    }
    for index in [1, 3] {
        assert_eq!(
            TestEnv::read_run(inner.as_ref(), runs[index].id)
                .await
                .state_type(),
            StateType::Paused
        );
    }
}

#[tokio::test]
async fn test_write_conflict_is_retried() {
    let inner = TestEnv::memory_store();
    let runs = expired(2);
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    store.fail_writes_for(runs[0].id, WriteFault::Conflict { remaining: 2 });
    store.fail_writes_for(runs[1].id, WriteFault::Conflict { remaining: 5 });

    let summary = FailExpiredPauses::new(Arc::new(store.clone()))
        .fail_expired_pauses()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errored, 1);
    assert_failed_by_expiration(inner.as_ref(), runs[0].id).await;
    assert_eq!(
        TestEnv::read_run(inner.as_ref(), runs[1].id)
            .await
            .state_type(),
        StateType::Paused
    );
}

#[tokio::test]
async fn test_commit_conflict_redoes_the_batch() {
    let inner = TestEnv::memory_store();
    let runs = expired(3);
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    store.fail_next_commits(1);

    let summary = FailExpiredPauses::new(Arc::new(store.clone()))
        .fail_expired_pauses()
        .await
        .unwrap();

    // 失败的那次尝试不计入统计
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.batches, 1);
    assert_eq!(store.commits(), 1);
    assert_eq!(store.select_calls(), 2);
    for run in &runs {
        assert_failed_by_expiration(inner.as_ref(), run.id).await;
    }
}

#[tokio::test]
async fn test_stale_transaction_redoes_the_batch() {
    let inner = TestEnv::memory_store();
    let runs = expired(3);
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    store.fail_writes_for(runs[1].id, WriteFault::StaleTransaction { remaining: 1 });

    let summary = FailExpiredPauses::new(Arc::new(store.clone()))
        .fail_expired_pauses()
        .await
        .unwrap();

    // 快照失效后不在原事务内逐个重试，而是回滚并整批重做
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.errored, 0);
    assert_eq!(summary.batches, 1);
    assert_eq!(store.select_calls(), 2);
    assert_eq!(store.commits(), 1);
    for run in &runs {
        assert_failed_by_expiration(inner.as_ref(), run.id).await;
    }
}

#[tokio::test]
async fn test_persistent_commit_conflict_fails_the_pass() {
    let inner = TestEnv::memory_store();
    let runs = expired(3);
    TestEnv::seed_runs(inner.as_ref(), &runs).await;

    let store = FaultInjectingStore::new(inner.clone());
    store.fail_next_commits(3);

    let err = FailExpiredPauses::new(Arc::new(store.clone()))
        .fail_expired_pauses()
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    for run in &runs {
        assert_eq!(
            TestEnv::read_run(inner.as_ref(), run.id).await.state_type(),
            StateType::Paused
        );
    }
}

#[tokio::test]
async fn test_unreachable_store_stops_the_service() {
    let store = FaultInjectingStore::new(TestEnv::memory_store());
    store.fail_begin(true);

    let service = Arc::new(FailExpiredPauses::new(Arc::new(store.clone())));
    assert!(service.run_once().await.is_err());

    let runner = LoopServiceRunner::new(service);
    let err = runner.start(Some(3)).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::ServiceFatal { ref service, .. } if service == "FailExpiredPauses"
    ));
    assert_eq!(store.select_calls(), 0);
}

#[tokio::test]
async fn test_runner_drives_passes_until_loop_limit() {
    let store = TestEnv::memory_store();
    let first = FlowRunBuilder::new()
        .pause_expired(Duration::minutes(1))
        .build();
    TestEnv::seed_runs(store.as_ref(), &[first.clone()]).await;

    let service = FailExpiredPauses::new(store.clone())
        .with_loop_interval(std::time::Duration::from_millis(10));
    let runner = LoopServiceRunner::new(Arc::new(service));

    let report = runner.start(Some(2)).await.unwrap();
    assert_eq!(report.iterations, 2);
    assert_failed_by_expiration(store.as_ref(), first.id).await;
}

#[tokio::test]
async fn test_pass_on_sqlite_store() {
    let store = TestEnv::sqlite_store().await;
    let runs = expired(7);
    let pending = FlowRunBuilder::new()
        .pause_pending(Duration::hours(1))
        .build();
    TestEnv::seed_runs(store.as_ref(), &runs).await;
    TestEnv::seed_runs(store.as_ref(), &[pending.clone()]).await;

    let summary = FailExpiredPauses::new(store.clone())
        .with_batch_size(3)
        .fail_expired_pauses()
        .await
        .unwrap();

    assert_eq!(summary.examined, 8);
    assert_eq!(summary.failed, 7);
    assert_eq!(summary.skipped, 1);
    for run in &runs {
        assert_failed_by_expiration(store.as_ref(), run.id).await;
    }
    assert_eq!(
        TestEnv::read_run(store.as_ref(), pending.id).await.state_type(),
        StateType::Paused
    );

    // 第二轮没有可处理的运行
    let again = FailExpiredPauses::new(store.clone())
        .fail_expired_pauses()
        .await
        .unwrap();
    assert_eq!(again.failed, 0);
    assert_eq!(again.examined, 1);
}
