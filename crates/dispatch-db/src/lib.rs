//! Durable, transactional store for dispatcher tasks.
//!
//! Backed by PostgreSQL. Single-writer semantics are enforced by an
//! advisory lock ([`pool::acquire_writer_lock`]); readers may proceed
//! concurrently through an ordinary pooled connection.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
