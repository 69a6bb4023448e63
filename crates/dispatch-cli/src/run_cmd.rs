//! `dispatcherd run` command: the long-running dispatcher process.
//!
//! Resolves configuration, acquires the store's writer lock, starts the
//! health prober, the metrics HTTP endpoint, and the dispatch loop, then
//! blocks until a shutdown signal. Grounded in the reference CLI's
//! dispatch command, whose first-signal-cancels / second-signal-forces
//! shutdown convention this reuses unchanged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use dispatch_core::concurrency::ConcurrencyController;
use dispatch_core::config::Config;
use dispatch_core::dispatch::{self, DispatchConfig};
use dispatch_core::executor::ExecutorContext;
use dispatch_core::host::{Host, HostRegistry};
use dispatch_core::llm::cloud;
use dispatch_core::llm::HttpLlmClient;
use dispatch_core::observability::{self, server, Observability};
use dispatch_core::prober;

pub async fn run(config: Config) -> Result<()> {
    let pool = dispatch_db::pool::create_pool(&dispatch_db::config::DbConfig::new(config.database_url.clone()))
        .await
        .context("failed to connect to task store")?;

    let mut lock_conn = pool.acquire().await.context("failed to acquire a store connection for the writer lock")?;
    let acquired = dispatch_db::pool::try_acquire_writer_lock(&mut lock_conn)
        .await
        .context("failed to check the writer lock")?;
    if !acquired {
        return Err(anyhow::Error::new(dispatch_core::error::StoreError::WriterLockUnavailable));
    }

    let _logging_guards = observability::init_logging(&config.log_dir).context("failed to initialize logging")?;

    let registry = Arc::new(HostRegistry::new());
    let concurrency = Arc::new(ConcurrencyController::new());

    for host_spec in &config.hosts {
        registry
            .register(Host::new(
                host_spec.name.clone(),
                host_spec.endpoint.clone(),
                host_spec.model.clone(),
                host_spec.capabilities.clone(),
                host_spec.priority,
                host_spec.max_concurrent,
                std::time::Duration::from_secs(host_spec.timeout_secs),
            ))
            .await;
        concurrency.register_host(&host_spec.name, host_spec.max_concurrent);
    }
    for fallback in &config.cloud_fallbacks {
        let api_key = cloud::resolve_api_key(&fallback.api_key_env, &fallback.name, cloud::default_credentials_path().as_deref());
        if api_key.is_none() {
            tracing::warn!(host = %fallback.name, env_var = %fallback.api_key_env, "no credential found for cloud fallback host; it will be registered but every call to it will fail authentication");
        }
        registry
            .register(Host::with_api_key(
                fallback.name.clone(),
                fallback.endpoint.clone(),
                fallback.model.clone(),
                fallback.capabilities.clone(),
                fallback.priority,
                fallback.max_concurrent,
                std::time::Duration::from_secs(fallback.timeout_secs),
                api_key,
            ))
            .await;
        concurrency.register_host(&fallback.name, fallback.max_concurrent);
    }

    let metrics = Arc::new(dispatch_core::observability::Metrics::new());
    let observability = Arc::new(Observability::with_metrics(metrics.clone()));

    let ctx = Arc::new(ExecutorContext {
        pool: pool.clone(),
        registry: registry.clone(),
        concurrency,
        routing: config.routing,
        retry_policy: config.retry,
        circuit_policy: config.circuit,
        llm_client: Arc::new(HttpLlmClient::new()),
        observability,
    });

    let cancel = CancellationToken::new();

    let prober_cancel = cancel.clone();
    let prober_registry = registry.clone();
    let prober_handle = tokio::spawn(async move {
        prober::run(&prober_registry, prober::ProberConfig::default(), reqwest::Client::new(), prober_cancel).await;
    });

    let server_cancel = cancel.clone();
    let metrics_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(metrics, metrics_port, server_cancel).await {
            tracing::error!(error = %err, "metrics server exited with an error");
        }
    });

    let dispatch_cancel = cancel.clone();
    let dispatch_handle = tokio::spawn(dispatch::run(ctx, DispatchConfig::default(), dispatch_cancel));

    tokio::spawn(watch_for_shutdown_signal(cancel.clone()));

    let _ = tokio::join!(prober_handle, server_handle, dispatch_handle);

    dispatch_db::pool::release_writer_lock(&mut lock_conn).await.context("failed to release the writer lock")?;
    drop(lock_conn);
    pool.close().await;

    Ok(())
}

/// Runs for the process lifetime. The first SIGINT/SIGTERM cancels
/// `cancel`; a second one force-exits with code 130 before the drain
/// completes.
async fn watch_for_shutdown_signal(cancel: CancellationToken) {
    let got_first_signal = AtomicBool::new(false);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    loop {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }

        if got_first_signal.swap(true, Ordering::SeqCst) {
            eprintln!("\nForce exit.");
            std::process::exit(130);
        }
        eprintln!("\nShutting down gracefully (signal again to force)...");
        cancel.cancel();
    }
}
