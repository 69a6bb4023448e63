//! Per-task pipeline: resolve host, admit, call the LLM client under the
//! retry policy, commit the outcome.
//!
//! The admitted -> in_progress -> (closed | retry | blocked) pipeline for
//! one task, written as an explicit loop with an attempt counter rather
//! than recursion. The host is re-resolved on every attempt, including
//! retries, because circuit state may have changed between attempts.

use std::sync::Arc;

use dispatch_db::models::{Task, TaskStatus};
use dispatch_db::queries::tasks;
use sqlx::PgPool;
use tracing::warn;

use crate::concurrency::ConcurrencyController;
use crate::error::InferenceError;
use crate::host::{resolve, HostRegistry, RoutingTable};
use crate::llm::{InferenceRequest, LlmClient};
use crate::observability::{errors, ErrorContext, Observability};
use crate::retry::{CircuitPolicy, RetryPolicy};
use crate::task_kind::detect_type;

/// Everything a task needs to run to completion, shared across every task
/// the dispatch loop admits.
pub struct ExecutorContext {
    pub pool: PgPool,
    pub registry: Arc<HostRegistry>,
    pub concurrency: Arc<ConcurrencyController>,
    pub routing: RoutingTable,
    pub retry_policy: RetryPolicy,
    pub circuit_policy: CircuitPolicy,
    pub llm_client: Arc<dyn LlmClient>,
    pub observability: Arc<Observability>,
}

fn error_type_name(error: &InferenceError) -> &'static str {
    match error {
        InferenceError::Timeout { .. } => "InferenceError::Timeout",
        InferenceError::Transport { .. } => "InferenceError::Transport",
        InferenceError::Http { .. } => "InferenceError::Http",
        InferenceError::Decode { .. } => "InferenceError::Decode",
        InferenceError::Validation { .. } => "InferenceError::Validation",
    }
}

fn build_prompt(task: &Task) -> String {
    format!("Task: {}\n\n{}", task.title, task.description)
}

/// Runs one task to a terminal outcome (`closed` or `blocked`). If the
/// store commit itself fails, the task is left `in_progress` and this
/// returns without retrying the commit -- a restart's recovery pass is
/// the only thing that touches tasks stuck in that state.
pub async fn execute(ctx: &ExecutorContext, mut task: Task) {
    let task_kind = detect_type(&task);
    let mut attempt_index: u32 = 0;
    let mut committed_in_progress = false;

    loop {
        let hosts = ctx.registry.hosts().await;
        let Some(host) = resolve(&ctx.routing, &hosts, task_kind.routing_key()) else {
            let _ = tasks::transition(
                &ctx.pool,
                task.id,
                task.status,
                TaskStatus::Blocked,
                None,
                Some("no_host_available"),
                true,
            )
            .await;
            ctx.observability.log_task_event(
                tracing::Level::WARN,
                task.id,
                "task_blocked",
                &[("reason", "no_host_available")],
            );
            return;
        };

        let admission = match ctx.concurrency.try_acquire(&host.name, task.id) {
            Some(a) => a,
            None => ctx.concurrency.acquire(&host.name, task.id).await,
        };
        ctx.observability.log_task_event(
            tracing::Level::DEBUG,
            task.id,
            "task_admitted",
            &[("host", &host.name), ("attempt", &(attempt_index + 1).to_string())],
        );

        if !committed_in_progress {
            let rows = tasks::transition(&ctx.pool, task.id, task.status, TaskStatus::InProgress, None, None, false)
                .await
                .unwrap_or(0);
            if rows == 0 {
                warn!(event = "task_commit_failed", task_id = %task.id, "failed to commit in_progress; leaving task as-is");
                return;
            }
            task.status = TaskStatus::InProgress;
            committed_in_progress = true;
            ctx.observability.log_task_event(tracing::Level::INFO, task.id, "task_started", &[("host", &host.name)]);
        }

        let start = std::time::Instant::now();
        let request = InferenceRequest {
            prompt: build_prompt(&task),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        };

        let outcome = ctx.llm_client.infer(&host, request).await;
        let duration_ms = start.elapsed().as_millis() as f64;

        match outcome {
            Ok(response) => {
                if ctx.registry.mark_success(&host.name).await {
                    ctx.observability.metrics.set_circuit_open(&host.name, false);
                }
                let _ = tasks::transition(
                    &ctx.pool,
                    task.id,
                    task.status,
                    TaskStatus::Closed,
                    Some(&response.text),
                    None,
                    false,
                )
                .await;
                ctx.observability.metrics.record_task_completion(
                    &host.name,
                    "closed",
                    duration_ms,
                    response.tokens_in as u64,
                    response.tokens_out as u64,
                );
                ctx.observability.log_task_event(tracing::Level::INFO, task.id, "task_closed", &[("host", &host.name)]);
                drop(admission);
                return;
            }
            Err(err) => {
                let error_type = error_type_name(&err);
                let should_retry = ctx.retry_policy.should_retry(attempt_index, &err);
                let host_name = host.name.clone();
                let _ = tasks::increment_attempt_count(&ctx.pool, task.id).await;
                let record = errors::track(
                    task.id,
                    error_type,
                    &anyhow::Error::new(err),
                    ErrorContext {
                        host: Some(host_name.clone()),
                        attempt: attempt_index + 1,
                        task_type: Some(task_kind.routing_key().to_string()),
                    },
                );

                ctx.observability.metrics.record_task_completion(
                    &host_name,
                    if should_retry { "retry" } else { "blocked" },
                    duration_ms,
                    0,
                    0,
                );

                if should_retry {
                    drop(admission);
                    let delay = ctx.retry_policy.delay_for(attempt_index);
                    ctx.observability.log_task_event(
                        tracing::Level::WARN,
                        task.id,
                        "retry_scheduled",
                        &[("host", &host_name), ("delay_ms", &delay.as_millis().to_string())],
                    );
                    tokio::time::sleep(delay).await;
                    attempt_index += 1;
                    continue;
                }

                if ctx
                    .registry
                    .mark_failure(&host_name, ctx.circuit_policy.failure_threshold, ctx.circuit_policy.cooldown)
                    .await
                {
                    ctx.observability.metrics.set_circuit_open(&host_name, true);
                }
                let formatted = errors::format_for_result(&record);
                let _ = tasks::transition(
                    &ctx.pool,
                    task.id,
                    task.status,
                    TaskStatus::Blocked,
                    None,
                    Some(&formatted),
                    false,
                )
                .await;
                ctx.observability.log_task_event(
                    tracing::Level::ERROR,
                    task.id,
                    "task_blocked",
                    &[("host", &host_name)],
                );
                drop(admission);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dispatch_db::models::IssueType;
    use uuid::Uuid;

    #[test]
    fn build_prompt_includes_title_and_description() {
        let task = Task {
            id: Uuid::new_v4(),
            title: "Fix bug".into(),
            description: "Detailed repro steps".into(),
            status: TaskStatus::Open,
            priority: 2,
            issue_type: IssueType::Task,
            labels: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            result: None,
            attempt_count: 0,
            last_error: None,
        };
        let prompt = build_prompt(&task);
        assert!(prompt.contains("Fix bug"));
        assert!(prompt.contains("Detailed repro steps"));
    }

    #[test]
    fn error_type_name_matches_variant() {
        let err = InferenceError::Timeout { host: "h1".into(), timeout_secs: 30 };
        assert_eq!(error_type_name(&err), "InferenceError::Timeout");
    }
}
