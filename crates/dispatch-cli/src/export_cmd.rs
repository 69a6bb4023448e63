//! `dispatcherd export` command: write every task as a JSON-Lines file
//! (one task record per line) for interoperability with external tooling.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use sqlx::PgPool;

use dispatch_db::queries::tasks;

pub async fn run_export(pool: &PgPool, out: Option<&PathBuf>) -> Result<()> {
    let all = tasks::export_all(pool).await?;

    let mut writer: Box<dyn Write> = match out {
        Some(path) => {
            Box::new(std::fs::File::create(path).with_context(|| format!("cannot create output file: {}", path.display()))?)
        }
        None => Box::new(std::io::stdout().lock()),
    };

    for task in &all {
        let line = serde_json::to_string(task).context("failed to serialize task")?;
        writeln!(writer, "{line}")?;
    }

    if let Some(path) = out {
        eprintln!("Exported {} tasks to {}", all.len(), path.display());
    }

    Ok(())
}
