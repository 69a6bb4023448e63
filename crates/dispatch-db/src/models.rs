use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Closed,
    Blocked,
}

impl TaskStatus {
    /// `true` for a status that the dispatch loop never acts on again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            "blocked" => Ok(Self::Blocked),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// What kind of work item a task represents. Epics are never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Task,
    Epic,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Epic => "epic",
        };
        f.write_str(s)
    }
}

impl FromStr for IssueType {
    type Err = IssueTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "epic" => Ok(Self::Epic),
            other => Err(IssueTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`IssueType`] string.
#[derive(Debug, Clone)]
pub struct IssueTypeParseError(pub String);

impl fmt::Display for IssueTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid issue type: {:?}", self.0)
    }
}

impl std::error::Error for IssueTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of work routed to an inference host.
///
/// `labels` and `dependencies` are persisted as Postgres text/uuid arrays;
/// see [`crate::queries::tasks`] for the exact column mapping.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub issue_type: IssueType,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

/// An edge in the task dependency graph: `task_id` depends on `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

/// One row of the append-only status-transition audit log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub task_id: Uuid,
    pub prior_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
    pub occurred_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Count of tasks per status, as returned by [`crate::queries::tasks::stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub open: i64,
    pub in_progress: i64,
    pub closed: i64,
    pub blocked: i64,
}

/// A task bundled with the ids it depends on, as written and read by the
/// JSON-Lines export/import round-trip. `task_dependencies` rows don't
/// travel independently -- each export line is self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExport {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Closed,
            TaskStatus::Blocked,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        let result = "nope".parse::<TaskStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Closed.is_terminal());
        assert!(TaskStatus::Blocked.is_terminal());
        assert!(!TaskStatus::Open.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn issue_type_display_roundtrip() {
        let variants = [IssueType::Task, IssueType::Epic];
        for v in &variants {
            let s = v.to_string();
            let parsed: IssueType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn issue_type_invalid() {
        let result = "story".parse::<IssueType>();
        assert!(result.is_err());
    }
}
