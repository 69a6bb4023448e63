//! Validated startup configuration.
//!
//! This is the fully-resolved shape the dispatch loop is built from: host
//! list, routing map, retry/circuit parameters, observability settings.
//! Parsing the TOML file and merging in env vars/CLI flags happens in the
//! `dispatcherd` binary; this module only defines the target shape and
//! the validation rules every source must satisfy before the task store
//! is touched.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::host::RoutingTable;
use crate::retry::{CircuitPolicy, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub max_concurrent: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudFallbackSpec {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_cloud_priority")]
    pub priority: i32,
    pub max_concurrent: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub api_key_env: String,
}

fn default_priority() -> i32 {
    1
}

fn default_cloud_priority() -> i32 {
    99
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_exponential_base() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl RetrySection {
    fn into_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CircuitSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    300
}

impl CircuitSection {
    fn into_policy(self) -> CircuitPolicy {
        CircuitPolicy { failure_threshold: self.failure_threshold, cooldown: Duration::from_secs(self.cooldown_secs) }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub log_dir: PathBuf,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_metrics_port() -> u16 {
    9898
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

/// Raw shape of the TOML config file. Deserialized directly, then
/// validated and lowered into [`Config`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub circuit: CircuitSection,
    pub observability: ObservabilitySection,
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
    #[serde(default)]
    pub cloud_fallbacks: Vec<CloudFallbackSpec>,
    pub routing: std::collections::HashMap<String, Vec<String>>,
}

/// Fully validated configuration ready to drive the dispatch loop.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub retry: RetryPolicy,
    pub circuit: CircuitPolicy,
    pub log_dir: PathBuf,
    pub metrics_port: u16,
    pub hosts: Vec<HostSpec>,
    pub cloud_fallbacks: Vec<CloudFallbackSpec>,
    pub routing: RoutingTable,
}

impl Config {
    pub fn validate(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.database.url.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "database.url" });
        }
        if !file.database.url.starts_with("postgres://") && !file.database.url.starts_with("postgresql://") {
            return Err(ConfigError::Invalid {
                field: "database.url",
                reason: "must be a postgres:// or postgresql:// connection string".to_string(),
            });
        }

        if file.hosts.is_empty() && file.cloud_fallbacks.is_empty() {
            return Err(ConfigError::MissingField { field: "hosts" });
        }

        let mut seen_names = HashSet::new();
        for host in &file.hosts {
            if !seen_names.insert(host.name.clone()) {
                return Err(ConfigError::Invalid {
                    field: "hosts[].name",
                    reason: format!("duplicate host name: {}", host.name),
                });
            }
            if host.max_concurrent < 1 {
                return Err(ConfigError::Invalid {
                    field: "hosts[].max_concurrent",
                    reason: format!("host {} must allow at least 1 concurrent task", host.name),
                });
            }
        }

        if file.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if file.retry.initial_delay_ms == 0 || file.retry.max_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "retry",
                reason: "delay parameters must be positive".to_string(),
            });
        }
        if file.circuit.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "circuit.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }

        let all_capabilities: HashSet<&str> = file
            .hosts
            .iter()
            .flat_map(|h| h.capabilities.iter().map(String::as_str))
            .chain(file.cloud_fallbacks.iter().flat_map(|c| c.capabilities.iter().map(String::as_str)))
            .collect();

        let default_rule_routable = file
            .routing
            .get("default")
            .map(|caps| caps.iter().any(|c| all_capabilities.contains(c.as_str())))
            .unwrap_or(false);

        if !default_rule_routable && !file.routing.contains_key("default") {
            return Err(ConfigError::MissingField { field: "routing.default" });
        }
        if file.routing.contains_key("default") && !default_rule_routable {
            return Err(ConfigError::Invalid {
                field: "routing.default",
                reason: "no configured host or cloud fallback has a matching capability".to_string(),
            });
        }

        for (task_type, capabilities) in file.routing.iter() {
            if task_type == "default" {
                continue;
            }
            let routable = capabilities.iter().any(|c| all_capabilities.contains(c.as_str()));
            if !routable {
                tracing::warn!(
                    task_type = %task_type,
                    "routing rule has no matching host or cloud fallback capability; tasks of this type will fall through to the default rule"
                );
            }
        }

        let mut routing = RoutingTable::new();
        for (task_type, capabilities) in file.routing {
            routing.insert(task_type, capabilities);
        }

        Ok(Self {
            database_url: file.database.url,
            retry: file.retry.into_policy(),
            circuit: file.circuit.into_policy(),
            log_dir: file.observability.log_dir,
            metrics_port: file.observability.metrics_port,
            hosts: file.hosts,
            cloud_fallbacks: file.cloud_fallbacks,
            routing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        [database]
        url = "postgres://localhost:5432/dispatcher"

        [observability]
        log_dir = "/tmp/dispatcher-logs"

        [[hosts]]
        name = "h1"
        endpoint = "http://h1.local:8080"
        model = "m"
        capabilities = ["general"]
        max_concurrent = 2

        [routing]
        default = ["general"]
        "#
    }

    #[test]
    fn validates_minimal_config() {
        let file: ConfigFile = toml::from_str(minimal_toml()).unwrap();
        let config = Config::validate(file).unwrap();
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn rejects_duplicate_host_names() {
        let mut file: ConfigFile = toml::from_str(minimal_toml()).unwrap();
        let dup = file.hosts[0].clone();
        file.hosts.push(dup);
        assert!(Config::validate(file).is_err());
    }

    #[test]
    fn rejects_unroutable_default_rule() {
        let toml_str = r#"
        [database]
        url = "postgres://localhost:5432/dispatcher"

        [observability]
        log_dir = "/tmp/dispatcher-logs"

        [[hosts]]
        name = "h1"
        endpoint = "http://h1.local:8080"
        model = "m"
        capabilities = ["code"]
        max_concurrent = 2

        [routing]
        default = ["reasoning"]
        "#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        assert!(Config::validate(file).is_err());
    }

    #[test]
    fn rejects_zero_max_concurrent() {
        let mut file: ConfigFile = toml::from_str(minimal_toml()).unwrap();
        file.hosts[0].max_concurrent = 0;
        assert!(Config::validate(file).is_err());
    }
}
