use chrono::Duration;
use orchestrator_core::models::{State, StateType};
use orchestrator_core::OrchestratorError;
use orchestrator_domain::flow_run_states::{read_flow_run_state, read_flow_run_states};
use orchestrator_domain::{set_flow_run_state, set_flow_run_state_if, SetStateStatus};
use orchestrator_testing_utils::{FlowRunBuilder, TestEnv};

#[tokio::test]
async fn test_terminal_runs_reject_every_transition() {
    let store = TestEnv::memory_store();
    let terminal_states = [
        State::completed(),
        State::failed("boom"),
        State::crashed("oom"),
        State::cancelled(),
    ];

    for terminal in terminal_states {
        let run = FlowRunBuilder::new().with_state(terminal.clone()).build();
        TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

        for force in [false, true] {
            for target in [State::running(), State::pending(), State::crashed("late")] {
                let mut tx = store.begin_transaction().await.unwrap();
                let err = set_flow_run_state(tx.as_mut(), run.id, target, force)
                    .await
                    .unwrap_err();
                assert!(
                    matches!(err, OrchestratorError::TerminalStateViolation { run_id, state }
                        if run_id == run.id && state == terminal.state_type),
                    "unexpected error: {err}"
                );
                assert!(err.is_fatal());
                tx.commit().await.unwrap();
            }
        }

        let current = TestEnv::read_run(store.as_ref(), run.id).await;
        assert_eq!(current.state, terminal);
    }
}

#[tokio::test]
async fn test_reissued_transition_is_noop() {
    let store = TestEnv::memory_store();
    let run = FlowRunBuilder::new().running().build();
    TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

    let mut tx = store.begin_transaction().await.unwrap();
    let first = set_flow_run_state(tx.as_mut(), run.id, State::failed("exit code 1"), false)
        .await
        .unwrap();
    assert_eq!(first.status, SetStateStatus::Accepted);
    tx.commit().await.unwrap();

    let after_first = TestEnv::read_run(store.as_ref(), run.id).await;

    for force in [false, true] {
        let mut tx = store.begin_transaction().await.unwrap();
        let replay = set_flow_run_state(tx.as_mut(), run.id, State::failed("exit code 1"), force)
            .await
            .unwrap();
        assert_eq!(replay.status, SetStateStatus::NoOp);
        assert_eq!(replay.state, after_first.state);
        tx.commit().await.unwrap();
    }

    let after_replay = TestEnv::read_run(store.as_ref(), run.id).await;
    assert_eq!(after_replay.state, after_first.state);
    assert_eq!(after_replay.state_timestamp(), after_first.state_timestamp());

    let mut tx = store.begin_transaction().await.unwrap();
    assert_eq!(read_flow_run_states(tx.as_mut(), run.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_normal_path_rejects_unknown_transition() {
    let store = TestEnv::memory_store();
    let run = FlowRunBuilder::new()
        .with_state(State::scheduled(chrono::Utc::now()))
        .build();
    TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

    let mut tx = store.begin_transaction().await.unwrap();
    let err = set_flow_run_state(tx.as_mut(), run.id, State::completed(), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidTransition {
            from: StateType::Scheduled,
            to: StateType::Completed,
            ..
        }
    ));
    assert!(!err.is_fatal());

    // 强制路径绕过规则表
    let forced = set_flow_run_state(tx.as_mut(), run.id, State::completed(), true)
        .await
        .unwrap();
    assert!(forced.is_accepted());
    tx.commit().await.unwrap();

    let current = TestEnv::read_run(store.as_ref(), run.id).await;
    assert_eq!(current.state_type(), StateType::Completed);
}

#[tokio::test]
async fn test_missing_run_is_benign() {
    let store = TestEnv::memory_store();
    let mut tx = store.begin_transaction().await.unwrap();
    let err = set_flow_run_state(tx.as_mut(), uuid::Uuid::new_v4(), State::running(), true)
        .await
        .unwrap_err();
    assert!(err.is_benign());
}

#[tokio::test]
async fn test_guarded_write_requires_expected_state() {
    let store = TestEnv::memory_store();
    let run = FlowRunBuilder::new().running().build();
    TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

    let mut tx = store.begin_transaction().await.unwrap();
    let err = set_flow_run_state_if(
        tx.as_mut(),
        run.id,
        StateType::Paused,
        State::failed("The flow was paused and never resumed."),
        true,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidTransition {
            from: StateType::Running,
            to: StateType::Failed,
            ..
        }
    ));
    tx.commit().await.unwrap();

    assert_eq!(
        TestEnv::read_run(store.as_ref(), run.id).await.state_type(),
        StateType::Running
    );
}

#[tokio::test]
async fn test_state_timestamps_never_go_backwards() {
    let store = TestEnv::memory_store();
    let run = FlowRunBuilder::new().running().build();
    TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

    let backdated = State::completed().with_timestamp(run.state.timestamp - Duration::minutes(5));
    let mut tx = store.begin_transaction().await.unwrap();
    let result = set_flow_run_state(tx.as_mut(), run.id, backdated, false)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(result.state.timestamp, run.state.timestamp);
    let current = TestEnv::read_run(store.as_ref(), run.id).await;
    assert_eq!(current.state_timestamp(), run.state.timestamp);
}

#[tokio::test]
async fn test_concurrent_writers_cannot_both_succeed() {
    let store = TestEnv::memory_store();
    let run = FlowRunBuilder::new()
        .with_state(State::pending())
        .build();
    TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

    let mut first = store.begin_transaction().await.unwrap();
    let mut second = store.begin_transaction().await.unwrap();

    set_flow_run_state(first.as_mut(), run.id, State::running(), false)
        .await
        .unwrap();
    set_flow_run_state(second.as_mut(), run.id, State::cancelled(), false)
        .await
        .unwrap();

    first.commit().await.unwrap();
    let err = second.commit().await.unwrap_err();
    assert!(err.is_retryable());

    // 重试时基于最新状态重新校验
    let mut retry = store.begin_transaction().await.unwrap();
    let result = set_flow_run_state(retry.as_mut(), run.id, State::cancelled(), false)
        .await
        .unwrap();
    assert!(result.is_accepted());
    retry.commit().await.unwrap();

    let mut tx = store.begin_transaction().await.unwrap();
    let history: Vec<StateType> = read_flow_run_states(tx.as_mut(), run.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.state_type)
        .collect();
    assert_eq!(
        history,
        vec![StateType::Pending, StateType::Running, StateType::Cancelled]
    );
}

#[tokio::test]
async fn test_state_machine_on_sqlite() {
    let store = TestEnv::sqlite_store().await;
    let run = FlowRunBuilder::new().pause_expired(Duration::minutes(1)).build();
    TestEnv::seed_runs(store.as_ref(), &[run.clone()]).await;

    let mut tx = store.begin_transaction().await.unwrap();
    let result = set_flow_run_state_if(
        tx.as_mut(),
        run.id,
        StateType::Paused,
        State::failed("The flow was paused and never resumed."),
        true,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin_transaction().await.unwrap();
    let stored = read_flow_run_state(tx.as_mut(), result.state.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state_type, StateType::Failed);
    assert_eq!(
        stored.message.as_deref(),
        Some("The flow was paused and never resumed.")
    );
    assert_eq!(read_flow_run_states(tx.as_mut(), run.id).await.unwrap().len(), 2);
    assert!(read_flow_run_states(tx.as_mut(), uuid::Uuid::new_v4())
        .await
        .unwrap()
        .is_empty());
}
