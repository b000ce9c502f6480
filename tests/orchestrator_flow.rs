use tasksync::error::{Error, StoreError};
use tasksync::Priority;

mod support;
use support::{start_session, MemoryGateway, RecordingSender, OWNER};

#[tokio::test]
async fn add_task_confirms_into_cache() {
    let gateway = MemoryGateway::new();
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender.clone()).await;

    let task = session.add_task("Buy milk", None).await.expect("add");
    assert_eq!(task.id, "t1");
    assert_eq!(task.title, "Buy milk");
    assert!(!task.is_complete);
    assert_eq!(task.priority, Priority::Medium);

    let tasks = session.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "t1");
    assert!(tasks.iter().all(|task| !task.is_placeholder()));

    session.close().await.expect("close");
}

#[tokio::test]
async fn add_trims_title_and_applies_priority() {
    let gateway = MemoryGateway::new();
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender).await;

    let task = session
        .add_task("  Water plants  ", Some(Priority::High))
        .await
        .expect("add");
    assert_eq!(task.title, "Water plants");
    assert_eq!(task.priority, Priority::High);

    session.close().await.expect("close");
}

#[tokio::test]
async fn add_with_empty_title_is_rejected_before_any_store_call() {
    let gateway = MemoryGateway::new();
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender).await;

    let err = session.add_task("   ", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(session.tasks().is_empty());
    assert!(gateway.row_ids().is_empty());

    session.close().await.expect("close");
}

#[tokio::test]
async fn failed_add_removes_the_placeholder() {
    let gateway = MemoryGateway::new();
    gateway.fail_next_create(StoreError::rejected("row-level security"));
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender.clone()).await;

    let err = session.add_task("Buy milk", None).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert!(session.tasks().is_empty());
    assert_eq!(sender.count(), 0);

    session.close().await.expect("close");
}

#[tokio::test]
async fn retryable_add_failure_is_retried_to_success() {
    let gateway = MemoryGateway::new();
    gateway.fail_next_create(StoreError::unavailable("connection reset"));
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender).await;

    let task = session.add_task("Buy milk", None).await.expect("add");
    assert_eq!(task.id, "t1");
    assert_eq!(session.tasks().len(), 1);
    assert_eq!(gateway.row_ids(), ["t1"]);

    session.close().await.expect("close");
}

#[tokio::test]
async fn failed_toggle_reverts_to_the_snapshot() {
    let gateway = MemoryGateway::new();
    let seeded = gateway.seed("Buy milk", OWNER);
    gateway.fail_next_update(StoreError::rejected("permission denied"));
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender.clone()).await;

    let err = session.toggle_task(&seeded.id).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let tasks = session.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0], seeded);
    assert_eq!(sender.count(), 0);

    session.close().await.expect("close");
}

#[tokio::test]
async fn failed_delete_restores_the_task() {
    let gateway = MemoryGateway::new();
    let seeded = gateway.seed("Buy milk", OWNER);
    // Three retryable failures exhaust the initial call plus two retries.
    gateway.fail_next_delete(StoreError::unavailable("down"));
    gateway.fail_next_delete(StoreError::unavailable("down"));
    gateway.fail_next_delete(StoreError::unavailable("down"));
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender).await;

    let err = session.delete_task(&seeded.id).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let tasks = session.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0], seeded);
    assert_eq!(gateway.row_ids(), [seeded.id.clone()]);

    session.close().await.expect("close");
}

#[tokio::test]
async fn rename_and_reprioritize_round_trip() {
    let gateway = MemoryGateway::new();
    let seeded = gateway.seed("Buy milk", OWNER);
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender).await;

    let renamed = session
        .rename_task(&seeded.id, "Buy oat milk")
        .await
        .expect("rename");
    assert_eq!(renamed.title, "Buy oat milk");

    let bumped = session
        .set_priority(&seeded.id, Priority::High)
        .await
        .expect("set priority");
    assert_eq!(bumped.priority, Priority::High);
    assert_eq!(bumped.title, "Buy oat milk");

    let err = session.rename_task(&seeded.id, "  ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    session.close().await.expect("close");
}

#[tokio::test]
async fn mutating_an_unknown_task_fails_fast() {
    let gateway = MemoryGateway::new();
    let sender = RecordingSender::new();
    let mut session = start_session(gateway.clone(), sender).await;

    assert!(matches!(
        session.toggle_task("ghost").await.unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert!(matches!(
        session.delete_task("ghost").await.unwrap_err(),
        Error::InvalidArgument(_)
    ));

    session.close().await.expect("close");
}
