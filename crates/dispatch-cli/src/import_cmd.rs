//! `dispatcherd import` command: restore tasks (and their dependency
//! edges) from a JSON-Lines file produced by `dispatcherd export`.

use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use sqlx::PgPool;

use dispatch_db::queries::tasks;

pub async fn run_import(pool: &PgPool, input: Option<&PathBuf>) -> Result<()> {
    let reader: Box<dyn std::io::BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("cannot open input file: {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin().lock())),
    };

    let count = tasks::import_jsonl(pool, reader).await?;

    match input {
        Some(path) => eprintln!("Imported {count} tasks from {}", path.display()),
        None => eprintln!("Imported {count} tasks from stdin"),
    }

    Ok(())
}
