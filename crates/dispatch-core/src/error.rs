//! Per-component error taxonomy.
//!
//! Each layer gets its own enum rather than one crate-wide error type, so a
//! caller that only talks to the router never has to match on store or
//! inference variants it cannot produce. Call sites that cross a layer
//! boundary attach context with [`anyhow::Context`] instead of converting.

use uuid::Uuid;

/// Errors from routing a task to a host.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no healthy host available for task type {task_type}")]
    NoHealthyHost { task_type: String },

    #[error("task type {0:?} has no routing rule and no default rule is configured")]
    UnroutableTaskType(String),
}

/// Errors from a single inference call. Mirrors the distinctions the retry
/// policy needs to make: timeouts and transport failures are transient,
/// decode/validation failures are permanent.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request to host {host} timed out after {timeout_secs}s")]
    Timeout { host: String, timeout_secs: u64 },

    #[error("transport error contacting host {host}: {source}")]
    Transport {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("host {host} returned HTTP {status}")]
    Http { host: String, status: u16 },

    #[error("could not decode response from host {host}: {source}")]
    Decode {
        host: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid request for host {host}: {reason}")]
    Validation { host: String, reason: String },
}

impl InferenceError {
    /// `true` for errors the retry policy should treat as transient.
    /// Validation and decode errors are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::Decode { .. })
    }
}

/// Errors surfaced by the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {0} already exists")]
    Duplicate(Uuid),

    #[error("refused to transition task {task_id} out of terminal state {from}")]
    InvalidTransition { task_id: Uuid, from: String },

    #[error("failed to acquire the exclusive writer lock: another dispatcher may be running")]
    WriterLockUnavailable,
}

/// Fatal at startup; never seen after the dispatch loop begins.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
}
