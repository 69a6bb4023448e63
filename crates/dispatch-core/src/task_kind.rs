//! Task-type detection.
//!
//! A closed, exhaustively-matchable variant rather than a
//! handler-function-keyed-by-string lookup. The detection order is the
//! contract: labels are checked before the title prefix, and within
//! labels the order below is the priority order.

use dispatch_db::models::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    CodeGen,
    CodeRefactor,
    CodeReview,
    TextProc,
    Summarize,
    Reasoning,
    General,
}

impl TaskKind {
    /// The routing-table key for this kind, matching the TOML `[routing]`
    /// table's task-type strings.
    pub fn routing_key(self) -> &'static str {
        match self {
            Self::CodeGen => "code-generation",
            Self::CodeRefactor => "code-refactor",
            Self::CodeReview => "code-review",
            Self::TextProc => "text-processing",
            Self::Summarize => "summarize",
            Self::Reasoning => "reasoning",
            Self::General => "general",
        }
    }
}

pub fn detect_type(task: &Task) -> TaskKind {
    let labels = &task.labels;
    let has = |label: &str| labels.iter().any(|l| l == label);
    let title_lower = task.title.to_lowercase();

    if has("code-generation") || title_lower.starts_with("code:") {
        return TaskKind::CodeGen;
    }
    if has("code-refactor") {
        return TaskKind::CodeRefactor;
    }
    if has("code-review") {
        return TaskKind::CodeReview;
    }
    if has("text-processing") || has("text-generation") {
        return TaskKind::TextProc;
    }
    if has("summarize") {
        return TaskKind::Summarize;
    }
    if has("reasoning") || title_lower.contains("analyze") {
        return TaskKind::Reasoning;
    }

    TaskKind::General
}
