//! Prometheus metrics, instance-owned rather than global statics.
//!
//! The host set is resolved from configuration at runtime, so the label
//! values aren't known at compile time the way a fixed set of layer
//! counters would be; an instance-owned [`Registry`] built once at
//! startup and threaded through the dispatcher fits better than the
//! `lazy_static!` global registry pattern used for this codebase's
//! fixed, compile-time-known metric set.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

pub struct Metrics {
    registry: Registry,
    tasks_total: IntCounterVec,
    task_duration_ms: HistogramVec,
    tokens_total: IntCounterVec,
    in_flight: IntGaugeVec,
    circuit_open: IntGaugeVec,
    uptime_start: Instant,
    durations: Mutex<HashMap<String, Vec<f64>>>,
    /// Mirrors `tasks_total` for JSON export -- `IntCounterVec` has no
    /// convenient per-label read-back short of walking `registry.gather()`.
    task_counts: Mutex<HashMap<String, HashMap<String, u64>>>,
    /// Mirrors `tokens_total` for JSON export, same reason as `task_counts`.
    token_counts: Mutex<HashMap<String, (u64, u64)>>,
    /// Mirrors `in_flight` for JSON export, kept in lockstep by `set_in_flight`.
    in_flight_counts: Mutex<HashMap<String, i64>>,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("dispatcher_tasks_total", "Task completion count by host and status"),
            &["host", "status"],
        )
        .expect("valid metric definition");

        let task_duration_ms = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatcher_task_duration_ms",
                "Task duration in milliseconds",
            ),
            &["host", "quantile"],
        )
        .expect("valid metric definition");

        let tokens_total = IntCounterVec::new(
            Opts::new("dispatcher_tokens_total", "Token usage by host and direction"),
            &["host", "direction"],
        )
        .expect("valid metric definition");

        let in_flight = IntGaugeVec::new(
            Opts::new("dispatcher_in_flight", "In-flight task count per host"),
            &["host"],
        )
        .expect("valid metric definition");

        let circuit_open = IntGaugeVec::new(
            Opts::new("dispatcher_circuit_open", "1 if the host's circuit is open"),
            &["host"],
        )
        .expect("valid metric definition");

        registry.register(Box::new(tasks_total.clone())).expect("register tasks_total");
        registry.register(Box::new(task_duration_ms.clone())).expect("register task_duration_ms");
        registry.register(Box::new(tokens_total.clone())).expect("register tokens_total");
        registry.register(Box::new(in_flight.clone())).expect("register in_flight");
        registry.register(Box::new(circuit_open.clone())).expect("register circuit_open");

        Self {
            registry,
            tasks_total,
            task_duration_ms,
            tokens_total,
            in_flight,
            circuit_open,
            uptime_start: Instant::now(),
            durations: Mutex::new(HashMap::new()),
            task_counts: Mutex::new(HashMap::new()),
            token_counts: Mutex::new(HashMap::new()),
            in_flight_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_task_completion(
        &self,
        host: &str,
        status: &str,
        duration_ms: f64,
        tokens_in: u64,
        tokens_out: u64,
    ) {
        self.tasks_total.with_label_values(&[host, status]).inc();
        self.tokens_total.with_label_values(&[host, "in"]).inc_by(tokens_in);
        self.tokens_total.with_label_values(&[host, "out"]).inc_by(tokens_out);

        let mut durations = self.durations.lock().expect("durations lock poisoned");
        durations.entry(host.to_string()).or_default().push(duration_ms);

        let mut task_counts = self.task_counts.lock().expect("task counts lock poisoned");
        *task_counts.entry(host.to_string()).or_default().entry(status.to_string()).or_insert(0) += 1;

        let mut token_counts = self.token_counts.lock().expect("token counts lock poisoned");
        let entry = token_counts.entry(host.to_string()).or_insert((0, 0));
        entry.0 += tokens_in;
        entry.1 += tokens_out;
    }

    pub fn set_in_flight(&self, host: &str, count: i64) {
        self.in_flight.with_label_values(&[host]).set(count);
        self.in_flight_counts.lock().expect("in-flight counts lock poisoned").insert(host.to_string(), count);
    }

    pub fn set_circuit_open(&self, host: &str, open: bool) {
        self.circuit_open.with_label_values(&[host]).set(if open { 1 } else { 0 });
    }

    fn percentile(&self, host: &str, p: f64) -> f64 {
        let durations = self.durations.lock().expect("durations lock poisoned");
        let Some(samples) = durations.get(host) else { return 0.0 };
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let index = ((sorted.len() as f64) * p).floor() as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    fn publish_duration_quantiles(&self) {
        let hosts: Vec<String> = self.durations.lock().expect("durations lock poisoned").keys().cloned().collect();
        for host in hosts {
            for (label, p) in [("0.5", 0.5), ("0.95", 0.95), ("0.99", 0.99)] {
                let value = self.percentile(&host, p);
                self.task_duration_ms
                    .with_label_values(&[&host, label])
                    .observe(value);
            }
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.uptime_start.elapsed().as_secs_f64()
    }

    pub fn export_prometheus(&self) -> String {
        self.publish_duration_quantiles();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails for valid metrics");
        let mut text = String::from_utf8(buffer).expect("prometheus output is valid utf8");
        text.push_str(&format!(
            "# HELP dispatcher_uptime_seconds Dispatcher uptime\n# TYPE dispatcher_uptime_seconds gauge\ndispatcher_uptime_seconds {}\n",
            self.uptime_seconds()
        ));
        text
    }

    pub fn export_json(&self) -> MetricsSnapshot {
        let durations = self.durations.lock().expect("durations lock poisoned");
        let mut latency_ms = HashMap::new();
        for host in durations.keys() {
            latency_ms.insert(
                host.clone(),
                LatencySnapshot {
                    p50: self.percentile(host, 0.5),
                    p95: self.percentile(host, 0.95),
                    p99: self.percentile(host, 0.99),
                },
            );
        }
        drop(durations);

        let tasks = self.task_counts.lock().expect("task counts lock poisoned").clone();

        let tokens = self
            .token_counts
            .lock()
            .expect("token counts lock poisoned")
            .iter()
            .map(|(host, (input, output))| (host.clone(), TokenSnapshot { input: *input, output: *output }))
            .collect();

        let in_flight = self.in_flight_counts.lock().expect("in-flight counts lock poisoned").clone();

        MetricsSnapshot {
            tasks,
            latency_ms,
            tokens,
            in_flight,
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct LatencySnapshot {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Serialize)]
pub struct TokenSnapshot {
    #[serde(rename = "in")]
    pub input: u64,
    #[serde(rename = "out")]
    pub output: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub tasks: HashMap<String, HashMap<String, u64>>,
    pub latency_ms: HashMap<String, LatencySnapshot>,
    pub tokens: HashMap<String, TokenSnapshot>,
    pub in_flight: HashMap<String, i64>,
    pub uptime_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_host_is_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.percentile("h1", 0.5), 0.0);
    }

    #[test]
    fn percentile_reflects_recorded_samples() {
        let metrics = Metrics::new();
        for d in [10.0, 20.0, 30.0, 40.0, 100.0] {
            metrics.record_task_completion("h1", "closed", d, 0, 0);
        }
        assert!(metrics.percentile("h1", 0.99) >= metrics.percentile("h1", 0.5));
    }

    #[test]
    fn export_prometheus_includes_task_counter() {
        let metrics = Metrics::new();
        metrics.record_task_completion("h1", "closed", 15.0, 5, 10);
        let text = metrics.export_prometheus();
        assert!(text.contains("dispatcher_tasks_total"));
        assert!(text.contains("dispatcher_uptime_seconds"));
    }
}
