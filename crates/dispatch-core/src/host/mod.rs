//! Host registry -- the live set of inference hosts, mutated by the health
//! prober and the retry/circuit layer, read by the router.
//!
//! Modeled after the adapter registry pattern used elsewhere in this
//! codebase for named collections of runtime components, generalized here
//! to hold mutable per-host health state behind a single lock rather than
//! trait objects.

pub mod router;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

pub use router::{resolve, RoutingTable};

/// Static configuration plus live health state for one inference host.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub capabilities: Vec<String>,
    pub priority: i32,
    pub max_concurrent: u32,
    pub timeout: Duration,
    /// Bearer credential for cloud fallback hosts, resolved once at
    /// startup via [`crate::llm::cloud::resolve_api_key`]. `None` for
    /// on-prem hosts, which take no auth header.
    pub api_key: Option<String>,
    pub healthy: bool,
    pub last_probe: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Host {
    /// A freshly configured host: unhealthy until the first successful
    /// probe, no failure history.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        capabilities: Vec<String>,
        priority: i32,
        max_concurrent: u32,
        timeout: Duration,
    ) -> Self {
        Self::with_api_key(name, endpoint, model, capabilities, priority, max_concurrent, timeout, None)
    }

    /// Same as [`Host::new`], plus a resolved credential for hosts that
    /// need one (cloud fallbacks).
    #[allow(clippy::too_many_arguments)]
    pub fn with_api_key(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        capabilities: Vec<String>,
        priority: i32,
        max_concurrent: u32,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            capabilities,
            priority,
            max_concurrent,
            timeout,
            api_key,
            healthy: false,
            last_probe: None,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }

    /// Selectable iff reachable and not cooling down -- two independent
    /// signals, conjoined here.
    pub fn selectable(&self, now: DateTime<Utc>) -> bool {
        self.healthy && self.cooldown_until.is_none_or(|until| now >= until)
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

/// The live set of hosts, shared between the prober, the retry/circuit
/// layer, and the router.
#[derive(Default)]
pub struct HostRegistry {
    hosts: RwLock<HashMap<String, Host>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, host: Host) {
        self.hosts.write().await.insert(host.name.clone(), host);
    }

    /// A consistent point-in-time snapshot of every registered host.
    pub async fn hosts(&self) -> Vec<Host> {
        self.hosts.read().await.values().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<Host> {
        self.hosts.read().await.get(name).cloned()
    }

    /// Record a liveness probe result. Only the prober calls this; it never
    /// touches `cooldown_until`.
    pub async fn set_probe_result(&self, name: &str, healthy: bool, at: DateTime<Utc>) {
        let mut hosts = self.hosts.write().await;
        if let Some(host) = hosts.get_mut(name) {
            host.healthy = healthy;
            host.last_probe = Some(at);
            if healthy {
                host.consecutive_failures = 0;
            }
        }
    }

    /// Credit a failure attributed to an inference attempt against this
    /// host. Opens the circuit once `failure_threshold` is reached. Returns
    /// `true` iff this call is the one that opened it.
    pub async fn mark_failure(&self, name: &str, failure_threshold: u32, cooldown: Duration) -> bool {
        let mut hosts = self.hosts.write().await;
        if let Some(host) = hosts.get_mut(name) {
            host.consecutive_failures += 1;
            if host.consecutive_failures >= failure_threshold && host.cooldown_until.is_none() {
                host.cooldown_until = Some(Utc::now() + cooldown);
                tracing::warn!(event = "circuit_opened", host = name, failures = host.consecutive_failures, "circuit opened");
                return true;
            }
        }
        false
    }

    /// Reset the circuit after a successful inference call. Returns `true`
    /// iff this call is the one that closed it.
    pub async fn mark_success(&self, name: &str) -> bool {
        let mut hosts = self.hosts.write().await;
        if let Some(host) = hosts.get_mut(name) {
            let was_open = host.cooldown_until.is_some();
            host.consecutive_failures = 0;
            host.cooldown_until = None;
            if was_open {
                tracing::info!(event = "circuit_closed", host = name, "circuit closed");
                return true;
            }
        }
        false
    }
}
