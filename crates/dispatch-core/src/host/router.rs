//! Capability-based routing: task type -> ordered capability tags -> host.
//!
//! Resolution walks the capability list for a task type in order; the
//! first tag with at least one selectable host wins, and within that tag
//! hosts are ordered `(priority asc, name asc)`. This is a pure function
//! of the registry snapshot -- it never blocks and never mutates state.

use std::collections::HashMap;

use chrono::Utc;

use super::Host;

/// `task_type -> ordered list of capability tags`, with an optional
/// `default` entry used when a task type has no explicit rule.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rules: HashMap<String, Vec<String>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task_type: impl Into<String>, capabilities: Vec<String>) {
        self.rules.insert(task_type.into(), capabilities);
    }

    fn capabilities_for(&self, task_type: &str) -> Option<&[String]> {
        self.rules
            .get(task_type)
            .or_else(|| self.rules.get("default"))
            .map(Vec::as_slice)
    }
}

/// Resolve the best host for `task_type` given a registry snapshot.
///
/// Returns `None` when the task type (and `default`) resolve to no
/// capability with any selectable host -- the caller (the executor) turns
/// that into `blocked` with `no_host_available`, or falls through to a
/// cloud fallback if one is configured.
pub fn resolve(table: &RoutingTable, hosts: &[Host], task_type: &str) -> Option<Host> {
    let capabilities = table.capabilities_for(task_type)?;
    let now = Utc::now();

    for tag in capabilities {
        let mut candidates: Vec<&Host> = hosts
            .iter()
            .filter(|h| h.selectable(now) && h.has_capability(tag))
            .collect();

        if candidates.is_empty() {
            continue;
        }

        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        return candidates.into_iter().next().cloned();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn host(name: &str, caps: &[&str], priority: i32, healthy: bool) -> Host {
        let mut h = Host::new(
            name,
            format!("http://{name}.local"),
            "m",
            caps.iter().map(|s| s.to_string()).collect(),
            priority,
            1,
            Duration::from_secs(30),
        );
        h.healthy = healthy;
        h
    }

    #[test]
    fn picks_lowest_priority_within_first_matching_capability() {
        let mut table = RoutingTable::new();
        table.insert("code-generation", vec!["code".into()]);

        let hosts = vec![
            host("b", &["code"], 2, true),
            host("a", &["code"], 1, true),
        ];

        let resolved = resolve(&table, &hosts, "code-generation").unwrap();
        assert_eq!(resolved.name, "a");
    }

    #[test]
    fn ties_break_by_name() {
        let mut table = RoutingTable::new();
        table.insert("code-generation", vec!["code".into()]);

        let hosts = vec![
            host("zeta", &["code"], 1, true),
            host("alpha", &["code"], 1, true),
        ];

        let resolved = resolve(&table, &hosts, "code-generation").unwrap();
        assert_eq!(resolved.name, "alpha");
    }

    #[test]
    fn falls_through_capability_tags_in_order() {
        let mut table = RoutingTable::new();
        table.insert("reasoning", vec!["reasoning".into(), "general".into()]);

        let hosts = vec![host("fallback", &["general"], 1, true)];

        let resolved = resolve(&table, &hosts, "reasoning").unwrap();
        assert_eq!(resolved.name, "fallback");
    }

    #[test]
    fn unhealthy_hosts_are_skipped() {
        let mut table = RoutingTable::new();
        table.insert("default", vec!["general".into()]);

        let hosts = vec![host("down", &["general"], 1, false)];

        assert!(resolve(&table, &hosts, "anything").is_none());
    }

    #[test]
    fn unknown_task_type_falls_back_to_default() {
        let mut table = RoutingTable::new();
        table.insert("default", vec!["general".into()]);

        let hosts = vec![host("h1", &["general"], 1, true)];

        let resolved = resolve(&table, &hosts, "some-unlisted-type").unwrap();
        assert_eq!(resolved.name, "h1");
    }

    #[test]
    fn no_rule_and_no_default_is_none() {
        let table = RoutingTable::new();
        let hosts = vec![host("h1", &["general"], 1, true)];
        assert!(resolve(&table, &hosts, "whatever").is_none());
    }
}
