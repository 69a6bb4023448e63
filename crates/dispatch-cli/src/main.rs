mod config;
mod export_cmd;
mod import_cmd;
mod run_cmd;
mod status_cmd;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dispatcherd", about = "Async dispatcher that routes tasks to a cluster of LLM inference hosts")]
struct Cli {
    /// Path to the config file (default: $XDG_CONFIG_HOME/dispatcher/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (overrides DISPATCHER_DATABASE_URL env var and the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher until a shutdown signal is received
    Run,
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Database maintenance commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Print task counts by status
    Status,
    /// Export every task as JSON-Lines
    Export {
        /// Output file path (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import tasks from a JSON-Lines export
    Import {
        /// Input file path (defaults to stdin)
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Apply pending migrations
    Migrate,
}

const STARTER_CONFIG: &str = r#"[database]
url = "postgresql://localhost:5432/dispatcher"

[retry]
max_attempts = 3
initial_delay_ms = 100
max_delay_ms = 5000
exponential_base = 2.0
jitter = true

[circuit]
failure_threshold = 3
cooldown_secs = 300

[observability]
log_dir = "/var/log/dispatcher"
metrics_port = 9898

[[hosts]]
name = "local-1"
endpoint = "http://localhost:8000/v1"
model = "replace-me"
capabilities = ["general"]
priority = 1
max_concurrent = 4
timeout_secs = 120

[routing]
default = ["general"]
"#;

fn cmd_init(path: &PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }
    config::write_config_file(path, STARTER_CONFIG)?;
    println!("Config written to {}", path.display());
    println!("Edit the [[hosts]] and [routing] sections, then run `dispatcherd db migrate` and `dispatcherd run`.");
    Ok(())
}

async fn cmd_db_migrate(database_url: String) -> anyhow::Result<()> {
    let db_config = dispatch_db::config::DbConfig::new(database_url);
    dispatch_db::pool::ensure_database_exists(&db_config).await.context("failed to ensure database exists")?;
    let pool = dispatch_db::pool::create_pool(&db_config).await.context("failed to connect to database")?;
    dispatch_db::pool::run_migrations(&pool).await.context("failed to run migrations")?;
    let counts = dispatch_db::pool::table_counts(&pool).await?;
    println!("Migrations applied. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }
    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = config::config_path(cli.config.as_ref());

    match cli.command {
        Commands::Init { force } => {
            if let Err(err) = cmd_init(&config_path, force) {
                eprintln!("{err:#}");
                std::process::exit(2);
            }
        }
        Commands::Run => {
            let resolved = match config::resolve(&config_path, cli.database_url.as_deref()) {
                Ok(cfg) => cfg,
                Err(err) => {
                    eprintln!("{err:#}");
                    std::process::exit(2);
                }
            };
            if let Err(err) = run_cmd::run(resolved).await {
                eprintln!("{err:#}");
                std::process::exit(3);
            }
        }
        Commands::Db { command: DbCommands::Migrate } => {
            let database_url = config::resolve_database_url(
                cli.database_url.as_deref(),
                config::load_config_file(&config_path).ok().as_ref(),
            );
            if let Err(err) = cmd_db_migrate(database_url).await {
                eprintln!("{err:#}");
                std::process::exit(3);
            }
        }
        Commands::Status => {
            let database_url = config::resolve_database_url(
                cli.database_url.as_deref(),
                config::load_config_file(&config_path).ok().as_ref(),
            );
            let pool = dispatch_db::pool::create_pool(&dispatch_db::config::DbConfig::new(database_url)).await?;
            let result = status_cmd::run_status(&pool).await;
            pool.close().await;
            result?;
        }
        Commands::Export { out } => {
            let database_url = config::resolve_database_url(
                cli.database_url.as_deref(),
                config::load_config_file(&config_path).ok().as_ref(),
            );
            let pool = dispatch_db::pool::create_pool(&dispatch_db::config::DbConfig::new(database_url)).await?;
            let result = export_cmd::run_export(&pool, out.as_ref()).await;
            pool.close().await;
            result?;
        }
        Commands::Import { input } => {
            let database_url = config::resolve_database_url(
                cli.database_url.as_deref(),
                config::load_config_file(&config_path).ok().as_ref(),
            );
            let pool = dispatch_db::pool::create_pool(&dispatch_db::config::DbConfig::new(database_url)).await?;
            let result = import_cmd::run_import(&pool, input.as_ref()).await;
            pool.close().await;
            result?;
        }
    }

    Ok(())
}
