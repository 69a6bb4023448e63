//! Integration tests for the `status` and `export` commands, run against a
//! real temporary database the way `dispatch-db`'s migration tests are.

use uuid::Uuid;

use dispatch_db::models::IssueType;
use dispatch_db::queries::tasks;
use dispatch_test_utils::{create_test_db, drop_test_db};

#[path = "../src/export_cmd.rs"]
mod export_cmd;
#[path = "../src/status_cmd.rs"]
mod status_cmd;

#[tokio::test]
async fn status_counts_tasks_by_status() {
    let (pool, db_name) = create_test_db().await;

    tasks::create_task(&pool, Uuid::new_v4(), "t1", "d1", 1, IssueType::Task, &[]).await.unwrap();
    tasks::create_task(&pool, Uuid::new_v4(), "t2", "d2", 1, IssueType::Task, &[]).await.unwrap();

    let stats = tasks::stats(&pool).await.unwrap();
    assert_eq!(stats.open, 2);
    assert_eq!(stats.closed, 0);

    status_cmd::run_status(&pool).await.unwrap();

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn export_writes_one_json_line_per_task() {
    let (pool, db_name) = create_test_db().await;

    let id = Uuid::new_v4();
    tasks::create_task(&pool, id, "exported", "body", 0, IssueType::Task, &["code".to_string()]).await.unwrap();

    let tmp = tempfile::NamedTempFile::new().unwrap();
    let out_path = tmp.path().to_path_buf();
    export_cmd::run_export(&pool, Some(&out_path)).await.unwrap();

    let contents = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);

    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["id"], id.to_string());
    assert_eq!(record["title"], "exported");

    drop_test_db(&db_name).await;
}
