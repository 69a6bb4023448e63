//! `dispatcherd status` command: print task counts by status.
//!
//! Read-only; does not take the writer lock, so it is safe to run
//! alongside a live `dispatcherd run`.

use anyhow::Result;
use sqlx::PgPool;

use dispatch_db::queries::tasks;

pub async fn run_status(pool: &PgPool) -> Result<()> {
    let stats = tasks::stats(pool).await?;
    let total = stats.open + stats.in_progress + stats.closed + stats.blocked;

    println!("{:<14} {:>8}", "STATUS", "COUNT");
    println!("{}", "-".repeat(23));
    println!("{:<14} {:>8}", "open", stats.open);
    println!("{:<14} {:>8}", "in_progress", stats.in_progress);
    println!("{:<14} {:>8}", "closed", stats.closed);
    println!("{:<14} {:>8}", "blocked", stats.blocked);
    println!("{}", "-".repeat(23));
    println!("{:<14} {:>8}", "total", total);

    Ok(())
}
