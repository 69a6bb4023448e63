//! Structured logging, metrics, and error tracking as one explicit value,
//! built once at startup and passed by reference to every component that
//! needs it, rather than a set of module-level globals.

pub mod errors;
pub mod metrics;
pub mod server;

use std::path::Path;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;
use uuid::Uuid;

pub use errors::{ErrorContext, ErrorRecord};
pub use metrics::{Metrics, MetricsSnapshot};

/// Holds the non-blocking writer guards for the process lifetime; letting
/// these drop early silently drops buffered log lines.
pub struct LoggingGuards {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

/// `metrics` is `Arc`-wrapped so the HTTP endpoint in [`server`] can hold
/// the same registry the dispatch loop records into, rather than a
/// disconnected copy.
pub struct Observability {
    pub metrics: Arc<Metrics>,
}

impl Observability {
    pub fn new() -> Self {
        Self { metrics: Arc::new(Metrics::new()) }
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    pub fn log_task_event(&self, level: tracing::Level, task_id: Uuid, event: &str, fields: &[(&str, &str)]) {
        let fields_joined: String =
            fields.iter().map(|(k, v)| format!(" {k}={v}")).collect::<Vec<_>>().join("");
        match level {
            tracing::Level::ERROR => {
                tracing::error!(task_id = %task_id, event, "{event}{fields_joined}")
            }
            tracing::Level::WARN => {
                tracing::warn!(task_id = %task_id, event, "{event}{fields_joined}")
            }
            tracing::Level::DEBUG => {
                tracing::debug!(task_id = %task_id, event, "{event}{fields_joined}")
            }
            _ => tracing::info!(task_id = %task_id, event, "{event}{fields_joined}"),
        }
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes `tracing_subscriber` with a non-blocking stdout layer and a
/// non-blocking daily-rolling-file layer writing JSON records under
/// `log_dir`. Returns the guards; drop them only at process exit.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingGuards> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "dispatcher.jsonl");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(stdout_writer);
    let file_layer = tracing_subscriber::fmt::layer().json().with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(LoggingGuards { _stdout: stdout_guard, _file: file_guard })
}
