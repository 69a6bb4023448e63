//! Error tracking for post-mortem analysis.
//!
//! Every terminal failure is turned into an [`ErrorRecord`] carrying the
//! full cause chain, not just the top-level message, then rendered into
//! the human-readable block that the executor stores in a task's
//! `result`/`last_error` field.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub task_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
    pub cause_chain: Vec<String>,
    pub context: ErrorContext,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub host: Option<String>,
    pub attempt: u32,
    pub task_type: Option<String>,
}

pub fn track(
    task_id: Uuid,
    error_type: &str,
    error: &anyhow::Error,
    context: ErrorContext,
) -> ErrorRecord {
    ErrorRecord {
        task_id,
        timestamp: Utc::now(),
        error_type: error_type.to_string(),
        error_message: error.to_string(),
        cause_chain: error.chain().map(|e| e.to_string()).collect(),
        context,
    }
}

/// Single formatted block: error type and message, then attempts made,
/// then host history, then context, in that order.
pub fn format_for_result(record: &ErrorRecord) -> String {
    let mut out = String::new();
    out.push_str("ERROR REPORT\n");
    out.push_str("========================================\n");
    out.push_str(&format!("Task ID: {}\n", record.task_id));
    out.push_str(&format!("Time: {}\n", record.timestamp.to_rfc3339()));
    out.push_str(&format!("Type: {}\n", record.error_type));
    out.push_str(&format!("Message: {}\n\n", record.error_message));

    out.push_str(&format!("Attempts: {}\n", record.context.attempt));
    if let Some(host) = &record.context.host {
        out.push_str(&format!("Host: {host}\n"));
    }
    if let Some(task_type) = &record.context.task_type {
        out.push_str(&format!("Task type: {task_type}\n"));
    }

    if record.cause_chain.len() > 1 {
        out.push_str("\nCause chain:\n");
        for (i, cause) in record.cause_chain.iter().enumerate() {
            out.push_str(&format!("  {i}: {cause}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_includes_task_id_and_message() {
        let record = ErrorRecord {
            task_id: Uuid::nil(),
            timestamp: Utc::now(),
            error_type: "InferenceError::Timeout".to_string(),
            error_message: "request timed out".to_string(),
            cause_chain: vec!["request timed out".to_string()],
            context: ErrorContext { host: Some("h1".into()), attempt: 3, task_type: Some("general".into()) },
        };
        let rendered = format_for_result(&record);
        assert!(rendered.contains("request timed out"));
        assert!(rendered.contains("Host: h1"));
        assert!(rendered.contains("Attempts: 3"));
    }

    #[test]
    fn track_captures_cause_chain() {
        let base = anyhow::anyhow!("root cause");
        let wrapped = base.context("while calling host");
        let record = track(Uuid::nil(), "InferenceError::Transport", &wrapped, ErrorContext::default());
        assert_eq!(record.cause_chain.len(), 2);
        assert_eq!(record.cause_chain[0], "while calling host");
        assert_eq!(record.cause_chain[1], "root cause");
    }
}
