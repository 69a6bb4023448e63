//! Database query functions for the `tasks`, `task_dependencies`, and
//! `task_audit_log` tables.

use std::io::BufRead;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{IssueType, Task, TaskExport, TaskStats, TaskStatus};

/// Insert a new task row. Rejects duplicate ids.
#[allow(clippy::too_many_arguments)]
pub async fn create_task(
    pool: &PgPool,
    id: Uuid,
    title: &str,
    description: &str,
    priority: i32,
    issue_type: IssueType,
    labels: &[String],
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, title, description, priority, issue_type, labels) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(issue_type)
    .bind(labels)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    record_audit(pool, id, None, TaskStatus::Open, None).await?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Insert a dependency edge: `task_id` depends on `depends_on`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(pool: &PgPool, task_id: Uuid, depends_on: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fetch the next batch of ready tasks, ordered `(priority asc, created_at
/// asc)`. A task is ready when it is `open`, not an epic, and every
/// dependency (if any) is `closed`.
pub async fn ready_tasks(pool: &PgPool, limit: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         WHERE t.status = 'open' \
           AND t.issue_type != 'epic' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id AND dep.status != 'closed' \
           ) \
         ORDER BY t.priority ASC, t.created_at ASC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch ready tasks")?;

    Ok(tasks)
}

/// Atomically transition a task's status.
///
/// Optimistic locking: the UPDATE's WHERE clause includes `status = $from`,
/// so the row only changes if the current status still matches. Refuses to
/// move a task out of a terminal state (the caller must not ask for that;
/// this function enforces it as a defensive check on `from`).
///
/// `result`/`error` are only written when provided (`COALESCE`), so a
/// transition that doesn't carry one leaves the existing value untouched.
/// `attempt_count` is optionally bumped by one. Returns the number of rows
/// affected (0 means the expected `from` status did not match, or the task
/// does not exist).
pub async fn transition(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    result: Option<&str>,
    error: Option<&str>,
    bump_attempt: bool,
) -> Result<u64> {
    if from.is_terminal() {
        anyhow::bail!("cannot transition task {task_id} out of terminal state {from}");
    }

    let closed_at: Option<DateTime<Utc>> = if to == TaskStatus::Closed {
        Some(Utc::now())
    } else {
        None
    };

    let outcome = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             updated_at = NOW(), \
             closed_at = COALESCE($2, closed_at), \
             result = COALESCE($3, result), \
             last_error = COALESCE($4, last_error), \
             attempt_count = attempt_count + CASE WHEN $5 THEN 1 ELSE 0 END \
         WHERE id = $6 AND status = $7",
    )
    .bind(to)
    .bind(closed_at)
    .bind(result)
    .bind(error)
    .bind(bump_attempt)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    let rows = outcome.rows_affected();
    if rows > 0 {
        record_audit(pool, task_id, Some(from), to, error).await?;
    }

    Ok(rows)
}

/// Bump `attempt_count` by one without touching status. Used on every
/// failed inference attempt, before the caller decides retry vs.
/// terminal -- the terminal path's own `transition` call must not also
/// bump it, or a task would double-count its last attempt.
pub async fn increment_attempt_count(pool: &PgPool, task_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE tasks SET attempt_count = attempt_count + 1, updated_at = NOW() WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to increment attempt count")?;

    Ok(())
}

/// Append a row to the audit log. Never fails the caller's transaction
/// semantics on its own — callers that need strict atomicity should wrap
/// this together with the status update in a single `sqlx::Transaction`.
async fn record_audit(
    pool: &PgPool,
    task_id: Uuid,
    prior_status: Option<TaskStatus>,
    new_status: TaskStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_audit_log (task_id, prior_status, new_status, error) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(task_id)
    .bind(prior_status)
    .bind(new_status)
    .bind(error)
    .execute(pool)
    .await
    .context("failed to append audit log entry")?;

    Ok(())
}

/// Count of tasks per status.
pub async fn stats(pool: &PgPool) -> Result<TaskStats> {
    let rows: Vec<(TaskStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to compute task stats")?;

    let mut stats = TaskStats::default();
    for (status, count) in rows {
        match status {
            TaskStatus::Open => stats.open = count,
            TaskStatus::InProgress => stats.in_progress = count,
            TaskStatus::Closed => stats.closed = count,
            TaskStatus::Blocked => stats.blocked = count,
        }
    }
    Ok(stats)
}

/// Fetch up to `limit` audit entries, optionally scoped to one task, most
/// recent first.
pub async fn audit(
    pool: &PgPool,
    task_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<crate::models::AuditEntry>> {
    let entries = match task_id {
        Some(id) => {
            sqlx::query_as::<_, crate::models::AuditEntry>(
                "SELECT * FROM task_audit_log WHERE task_id = $1 \
                 ORDER BY occurred_at DESC LIMIT $2",
            )
            .bind(id)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, crate::models::AuditEntry>(
                "SELECT * FROM task_audit_log ORDER BY occurred_at DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
    .context("failed to fetch audit log")?;

    Ok(entries)
}

/// List every task, ordered by creation time. Used by the JSON-Lines export.
pub async fn all_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at ASC")
        .fetch_all(pool)
        .await
        .context("failed to list all tasks")?;

    Ok(tasks)
}

/// Every task together with its dependency ids, ordered by creation time.
/// The JSON-Lines export's one-record-per-task form -- each line is
/// self-contained, so an import can restore the dependency graph without
/// a second pass over the file.
pub async fn export_all(pool: &PgPool) -> Result<Vec<TaskExport>> {
    let tasks = all_tasks(pool).await?;
    let mut exports = Vec::with_capacity(tasks.len());
    for task in tasks {
        let dependencies = get_task_dependencies(pool, task.id).await?;
        exports.push(TaskExport { task, dependencies });
    }
    Ok(exports)
}

/// Insert a task row with every field taken verbatim from an export,
/// including its id, timestamps, and `attempt_count`, rather than letting
/// the database assign defaults. `ON CONFLICT (id) DO NOTHING` makes a
/// re-import of an already-present task a no-op. Does not append an audit
/// entry; a restored task's history is not the import's concern.
async fn insert_task_verbatim(pool: &PgPool, task: &Task) -> Result<()> {
    sqlx::query(
        "INSERT INTO tasks \
             (id, title, description, status, priority, issue_type, labels, \
              created_at, updated_at, closed_at, result, attempt_count, last_error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(task.priority)
    .bind(task.issue_type)
    .bind(&task.labels)
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(task.closed_at)
    .bind(&task.result)
    .bind(task.attempt_count)
    .bind(&task.last_error)
    .execute(pool)
    .await
    .context("failed to insert task from import")?;

    Ok(())
}

/// Restore a task store from its JSON-Lines export. Two-phase: every task
/// row is inserted before any dependency edge, since an edge can name a
/// task that appears later in the file.
///
/// Returns the number of task records read from `reader`.
pub async fn import_jsonl(pool: &PgPool, reader: impl BufRead) -> Result<usize> {
    let mut exports = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read import line")?;
        if line.trim().is_empty() {
            continue;
        }
        let export: TaskExport = serde_json::from_str(&line).context("failed to parse import line as a task record")?;
        exports.push(export);
    }

    for export in &exports {
        insert_task_verbatim(pool, &export.task).await?;
    }
    for export in &exports {
        for depends_on in &export.dependencies {
            insert_task_dependency(pool, export.task.id, *depends_on).await?;
        }
    }

    Ok(exports.len())
}
