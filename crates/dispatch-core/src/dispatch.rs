//! The dispatch loop: polls the task store for ready work and spawns an
//! [`executor`] for each task it can admit.
//!
//! Fetches ready tasks in priority order, skips anything already in
//! flight, peeks at host capacity before spawning rather than blocking
//! the tick on it, and backs off to a longer poll interval when there is
//! nothing to do. A spawned executor owns a task end to end including all
//! of its retries, so the loop only needs to track which task ids are
//! currently running, not which attempt they're on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dispatch_db::queries::tasks;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::{self, ExecutorContext};
use crate::host::resolve;
use crate::task_kind::detect_type;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How many ready tasks to fetch per tick.
    pub batch_size: i64,
    /// Poll interval when nothing is ready and nothing is in flight.
    pub idle_poll_interval: Duration,
    /// Poll interval when tasks are in flight but none were spawned this tick.
    pub busy_poll_interval: Duration,
    /// How long to wait for in-flight executors to finish after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            idle_poll_interval: Duration::from_secs(30),
            busy_poll_interval: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

/// Runs the dispatch loop until `cancel` fires, then drains in-flight
/// executors for up to `config.shutdown_grace` before returning. Tasks
/// still running past the grace period are left `in_progress`; nothing
/// kills them, they simply outlive this call.
pub async fn run(ctx: Arc<ExecutorContext>, config: DispatchConfig, cancel: CancellationToken) {
    let mut in_flight: JoinSet<Uuid> = JoinSet::new();
    let mut active_ids: HashSet<Uuid> = HashSet::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let ready = match tasks::ready_tasks(&ctx.pool, config.batch_size).await {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch ready tasks");
                Vec::new()
            }
        };

        let mut spawned_any = false;

        for task in ready {
            if active_ids.contains(&task.id) {
                continue;
            }

            let kind = detect_type(&task);
            let hosts = ctx.registry.hosts().await;
            let Some(host) = resolve(&ctx.routing, &hosts, kind.routing_key()) else {
                continue;
            };

            let capacity = ctx.concurrency.max_concurrent(&host.name).unwrap_or(1) as usize;
            if ctx.concurrency.active_count(&host.name) >= capacity {
                continue;
            }

            let task_id = task.id;
            let ctx = ctx.clone();
            active_ids.insert(task_id);
            spawned_any = true;
            in_flight.spawn(async move {
                executor::execute(&ctx, task).await;
                task_id
            });
        }

        while let Some(result) = in_flight.try_join_next() {
            if let Ok(task_id) = result {
                active_ids.remove(&task_id);
            }
        }

        for host in &ctx.registry.hosts().await {
            ctx.observability
                .metrics
                .set_in_flight(&host.name, ctx.concurrency.active_count(&host.name) as i64);
        }

        if in_flight.is_empty() && !spawned_any {
            tokio::select! {
                _ = tokio::time::sleep(config.idle_poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        } else if !spawned_any {
            tokio::select! {
                _ = tokio::time::sleep(config.busy_poll_interval) => {}
                result = in_flight.join_next() => {
                    if let Some(Ok(task_id)) = result {
                        active_ids.remove(&task_id);
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    tracing::info!(in_flight = in_flight.len(), "dispatch loop cancelled, draining in-flight tasks");
    let deadline = tokio::time::Instant::now() + config.shutdown_grace;
    loop {
        if in_flight.is_empty() {
            break;
        }
        match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(remaining = in_flight.len(), "shutdown grace period expired with tasks still in flight");
                break;
            }
        }
    }
}
