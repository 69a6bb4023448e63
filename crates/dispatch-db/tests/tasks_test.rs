//! Integration tests for the `tasks` query module, run against a real
//! temporary database per the pattern in `migrations_test.rs`.

use dispatch_db::models::{IssueType, TaskStatus};
use dispatch_db::queries::tasks;
use uuid::Uuid;

use dispatch_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn attempt_count_increments_independently_of_transition() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::create_task(&pool, Uuid::new_v4(), "t", "d", 2, IssueType::Task, &[]).await.unwrap();
    assert_eq!(task.attempt_count, 0);

    tasks::increment_attempt_count(&pool, task.id).await.unwrap();
    tasks::increment_attempt_count(&pool, task.id).await.unwrap();
    let after = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(after.attempt_count, 2);

    tasks::transition(&pool, task.id, TaskStatus::Open, TaskStatus::InProgress, None, None, false).await.unwrap();
    let unchanged = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.attempt_count, 2, "a transition with bump_attempt=false must not touch the count");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn export_then_import_round_trips_tasks_and_dependencies() {
    let (source, source_db) = create_test_db().await;

    let dep = tasks::create_task(&source, Uuid::new_v4(), "dependency", "", 1, IssueType::Task, &["infra".to_string()])
        .await
        .unwrap();
    let dependent = tasks::create_task(&source, Uuid::new_v4(), "dependent", "", 2, IssueType::Task, &[]).await.unwrap();
    tasks::insert_task_dependency(&source, dependent.id, dep.id).await.unwrap();
    tasks::transition(&source, dep.id, TaskStatus::Open, TaskStatus::InProgress, None, None, false).await.unwrap();
    tasks::transition(&source, dep.id, TaskStatus::InProgress, TaskStatus::Closed, Some("done"), None, false)
        .await
        .unwrap();

    let exported = tasks::export_all(&source).await.unwrap();
    assert_eq!(exported.len(), 2);

    let lines: Vec<String> = exported.iter().map(|e| serde_json::to_string(e).unwrap()).collect();
    let jsonl = lines.join("\n");

    let (target, target_db) = create_test_db().await;
    let imported = tasks::import_jsonl(&target, jsonl.as_bytes()).await.unwrap();
    assert_eq!(imported, 2);

    let restored_dep = tasks::get_task(&target, dep.id).await.unwrap().unwrap();
    assert_eq!(restored_dep.status, TaskStatus::Closed);
    assert_eq!(restored_dep.result.as_deref(), Some("done"));
    assert_eq!(restored_dep.labels, vec!["infra".to_string()]);

    let restored_dependencies = tasks::get_task_dependencies(&target, dependent.id).await.unwrap();
    assert_eq!(restored_dependencies, vec![dep.id]);

    source.close().await;
    target.close().await;
    drop_test_db(&source_db).await;
    drop_test_db(&target_db).await;
}

#[tokio::test]
async fn import_is_idempotent_on_conflicting_ids() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::create_task(&pool, Uuid::new_v4(), "t", "", 2, IssueType::Task, &[]).await.unwrap();
    let exported = tasks::export_all(&pool).await.unwrap();
    let line = serde_json::to_string(&exported[0]).unwrap();

    let first = tasks::import_jsonl(&pool, line.as_bytes()).await.unwrap();
    let second = tasks::import_jsonl(&pool, line.as_bytes()).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 1, "re-importing an already-present id should not error");

    let stats = tasks::stats(&pool).await.unwrap();
    assert_eq!(stats.open, 1, "ON CONFLICT DO NOTHING must not duplicate the row");

    let _ = task;
    pool.close().await;
    drop_test_db(&db_name).await;
}
