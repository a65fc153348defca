use chrono::{Duration, Utc};
use orchestrator_core::config::models::WorkPoolsConfig;
use orchestrator_core::models::{WorkerPoolStatus, DEFAULT_QUEUE_NAME};
use orchestrator_core::OrchestratorError;
use orchestrator_domain::work_pools::{
    create_work_pool, create_work_pool_queue, delete_work_pool, delete_work_queue,
    read_effective_concurrency_limit, read_ordered_queues, read_work_pool_status,
    set_default_queue, worker_heartbeat,
};
use orchestrator_testing_utils::{FlowRunBuilder, TestEnv, WorkPoolBuilder, WorkQueueBuilder};

#[tokio::test]
async fn test_pool_is_created_with_default_queue() {
    for store in [TestEnv::memory_store(), TestEnv::sqlite_store().await] {
        let mut tx = store.begin_transaction().await.unwrap();
        let pool = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().with_name("k8s").build())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        let queues = read_ordered_queues(tx.as_mut(), pool.id).await.unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, DEFAULT_QUEUE_NAME);
        assert_eq!(queues[0].priority, 1);
        assert_eq!(pool.default_queue_id, Some(queues[0].id));

        let stored = tx.read_work_pool(pool.id).await.unwrap().unwrap();
        assert_eq!(stored.default_queue_id, pool.default_queue_id);

        let err = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().with_name("k8s").build())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidWorkPool(_)));
    }
}

#[tokio::test]
async fn test_queues_ordered_by_priority_then_insertion() {
    let store = TestEnv::memory_store();
    let mut tx = store.begin_transaction().await.unwrap();
    let pool = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().build())
        .await
        .unwrap();
    for (name, priority) in [("A", 10), ("B", 5), ("C", 5)] {
        create_work_pool_queue(
            tx.as_mut(),
            WorkQueueBuilder::new(&pool)
                .with_name(name)
                .with_priority(priority)
                .build(),
        )
        .await
        .unwrap();
    }

    let names: Vec<String> = read_ordered_queues(tx.as_mut(), pool.id)
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.name)
        .collect();
    assert_eq!(names, vec![DEFAULT_QUEUE_NAME, "B", "C", "A"]);

    let err = create_work_pool_queue(
        tx.as_mut(),
        WorkQueueBuilder::new(&pool).with_name("B").build(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidWorkPool(_)));
}

#[tokio::test]
async fn test_effective_limit_read_through_store() {
    let store = TestEnv::memory_store();
    let mut tx = store.begin_transaction().await.unwrap();

    let bounded = create_work_pool(
        tx.as_mut(),
        WorkPoolBuilder::new()
            .with_name("bounded")
            .with_concurrency_limit(5)
            .build(),
    )
    .await
    .unwrap();
    let unbounded = create_work_pool(
        tx.as_mut(),
        WorkPoolBuilder::new().with_name("unbounded").build(),
    )
    .await
    .unwrap();
    let capped = create_work_pool_queue(
        tx.as_mut(),
        WorkQueueBuilder::new(&unbounded)
            .with_name("capped")
            .with_concurrency_limit(3)
            .build(),
    )
    .await
    .unwrap();

    let bounded_default = bounded.default_queue_id.unwrap();
    let unbounded_default = unbounded.default_queue_id.unwrap();

    assert_eq!(
        read_effective_concurrency_limit(tx.as_mut(), bounded_default)
            .await
            .unwrap(),
        Some(5)
    );
    assert_eq!(
        read_effective_concurrency_limit(tx.as_mut(), capped.id)
            .await
            .unwrap(),
        Some(3)
    );
    assert_eq!(
        read_effective_concurrency_limit(tx.as_mut(), unbounded_default)
            .await
            .unwrap(),
        None
    );

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        read_effective_concurrency_limit(tx.as_mut(), missing).await,
        Err(OrchestratorError::WorkPoolQueueNotFound { id }) if id == missing
    ));
}

#[tokio::test]
async fn test_default_queue_must_belong_to_pool() {
    let store = TestEnv::memory_store();
    let mut tx = store.begin_transaction().await.unwrap();
    let first = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().with_name("first").build())
        .await
        .unwrap();
    let second = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().with_name("second").build())
        .await
        .unwrap();

    let foreign = second.default_queue_id.unwrap();
    let err = set_default_queue(tx.as_mut(), first.id, foreign)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidWorkPool(_)));

    let own = create_work_pool_queue(
        tx.as_mut(),
        WorkQueueBuilder::new(&first).with_name("high").with_priority(0).build(),
    )
    .await
    .unwrap();
    let updated = set_default_queue(tx.as_mut(), first.id, own.id).await.unwrap();
    assert_eq!(updated.default_queue_id, Some(own.id));
}

#[tokio::test]
async fn test_default_queue_cannot_be_deleted_directly() {
    let store = TestEnv::memory_store();
    let mut tx = store.begin_transaction().await.unwrap();
    let pool = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().build())
        .await
        .unwrap();
    let extra = create_work_pool_queue(
        tx.as_mut(),
        WorkQueueBuilder::new(&pool).with_name("extra").build(),
    )
    .await
    .unwrap();

    let err = delete_work_queue(tx.as_mut(), pool.default_queue_id.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidWorkPool(_)));

    assert!(delete_work_queue(tx.as_mut(), extra.id).await.unwrap());
    assert!(!delete_work_queue(tx.as_mut(), extra.id).await.unwrap());
}

#[tokio::test]
async fn test_delete_pool_cascades_in_one_transaction() {
    for store in [TestEnv::memory_store(), TestEnv::sqlite_store().await] {
        let mut tx = store.begin_transaction().await.unwrap();
        let pool = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().build())
            .await
            .unwrap();
        let queue = create_work_pool_queue(
            tx.as_mut(),
            WorkQueueBuilder::new(&pool).with_name("batch").build(),
        )
        .await
        .unwrap();
        worker_heartbeat(tx.as_mut(), pool.id, "worker-1", Utc::now())
            .await
            .unwrap();
        let run = FlowRunBuilder::new().with_work_queue(queue.id).build();
        tx.create_flow_run(&run).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        assert!(delete_work_pool(tx.as_mut(), pool.id).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        assert!(tx.read_work_pool(pool.id).await.unwrap().is_none());
        assert!(tx.read_work_queues(pool.id).await.unwrap().is_empty());
        assert!(tx.read_workers(pool.id).await.unwrap().is_empty());
        assert_eq!(tx.read_run(run.id).await.unwrap().unwrap().work_queue_id, None);
    }
}

#[tokio::test]
async fn test_pool_status_follows_heartbeats() {
    let store = TestEnv::memory_store();
    let timeout = WorkPoolsConfig::default().worker_heartbeat_timeout_seconds;
    let now = Utc::now();
    let mut tx = store.begin_transaction().await.unwrap();
    let pool = create_work_pool(tx.as_mut(), WorkPoolBuilder::new().build())
        .await
        .unwrap();

    assert_eq!(
        read_work_pool_status(tx.as_mut(), pool.id, now, timeout).await.unwrap(),
        WorkerPoolStatus::NotReady
    );

    worker_heartbeat(tx.as_mut(), pool.id, "worker-1", now - Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(
        read_work_pool_status(tx.as_mut(), pool.id, now, timeout).await.unwrap(),
        WorkerPoolStatus::NotReady
    );

    worker_heartbeat(tx.as_mut(), pool.id, "worker-1", now - Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(
        read_work_pool_status(tx.as_mut(), pool.id, now, timeout).await.unwrap(),
        WorkerPoolStatus::Ready
    );

    let mut paused = tx.read_work_pool(pool.id).await.unwrap().unwrap();
    paused.is_paused = true;
    tx.update_work_pool(&paused).await.unwrap();
    assert_eq!(
        read_work_pool_status(tx.as_mut(), pool.id, now, timeout).await.unwrap(),
        WorkerPoolStatus::Paused
    );

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        worker_heartbeat(tx.as_mut(), missing, "ghost", now).await,
        Err(OrchestratorError::WorkPoolNotFound { .. })
    ));
}
