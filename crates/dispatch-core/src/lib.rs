//! Async dispatcher core: routes tasks from a [`dispatch_db`] task store to
//! a cluster of LLM inference hosts, under per-host concurrency limits,
//! retry and circuit-breaker policies, and structured observability.

pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod host;
pub mod llm;
pub mod observability;
pub mod prober;
pub mod retry;
pub mod task_kind;
