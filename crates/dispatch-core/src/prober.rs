//! Background liveness probing of configured hosts.
//!
//! Runs on a fixed interval, independent of the circuit breaker: a probe
//! only ever updates `healthy`/`last_probe`/resets `consecutive_failures`
//! on success, never touches `cooldown_until` (that is credited by the
//! retry/circuit layer against real inference failures).

use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::host::{Host, HostRegistry};

/// GET this path under a host's endpoint to check liveness. Matches the
/// model-listing endpoint real inference servers expose; confirmed
/// against the liveness check this crate's routing logic was modeled on.
const LIVENESS_PATH: &str = "/models";

#[derive(Debug, Clone, Copy)]
pub struct ProberConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs until `cancel` fires. Intended to be spawned as its own task.
pub async fn run(
    registry: &HostRegistry,
    config: ProberConfig,
    client: reqwest::Client,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(event = "prober_stopped", "health prober shutting down");
                return;
            }
            _ = ticker.tick() => {
                probe_all(registry, &client, config.probe_timeout).await;
            }
        }
    }
}

async fn probe_all(registry: &HostRegistry, client: &reqwest::Client, timeout: Duration) {
    let hosts = registry.hosts().await;
    for host in hosts {
        let healthy = probe_one(client, &host, timeout).await;
        let now = chrono::Utc::now();
        registry.set_probe_result(&host.name, healthy, now).await;
        debug!(event = "host_probe", host = %host.name, healthy, "probe result");
    }
}

async fn probe_one(client: &reqwest::Client, host: &Host, timeout: Duration) -> bool {
    let url = format!("{}{}", host.endpoint.trim_end_matches('/'), LIVENESS_PATH);
    match client.get(&url).timeout(timeout).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

/// Wraps a [`HostRegistry`] with an interior snapshot used by callers that
/// need to read a host's live state outside of the async registry lock,
/// e.g. for a synchronous status render. Thin enough to be a convenience
/// rather than a separate component.
pub struct SnapshotCache {
    hosts: RwLock<Vec<Host>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self { hosts: RwLock::new(Vec::new()) }
    }

    pub async fn refresh(&self, registry: &HostRegistry) {
        let snapshot = registry.hosts().await;
        *self.hosts.write().await = snapshot;
    }

    pub async fn get(&self) -> Vec<Host> {
        self.hosts.read().await.clone()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = ProberConfig::default();
        assert_eq!(cfg.interval, StdDuration::from_secs(30));
        assert_eq!(cfg.probe_timeout, StdDuration::from_secs(5));
    }

    #[tokio::test]
    async fn probe_one_rejects_unreachable_host() {
        let client = reqwest::Client::new();
        let host = Host::new(
            "unreachable",
            "http://127.0.0.1:1",
            "m",
            vec!["general".into()],
            1,
            1,
            StdDuration::from_secs(1),
        );
        assert!(!probe_one(&client, &host, StdDuration::from_millis(200)).await);
    }
}
