//! Aggregation key/dimension derivation and in-window dedup (§4.8).

use crate::models::{Alert, Labels};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub fn dimension_keys(aggregate_by: &str) -> HashSet<String> {
    match aggregate_by {
        "hostname" => ["hostname", "host", "instance"].map(String::from).into_iter().collect(),
        "ip" => ["ip", "instance"].map(String::from).into_iter().collect(),
        "port" => ["port", "instance"].map(String::from).into_iter().collect(),
        other => [other.to_string()].into_iter().collect(),
    }
}

/// Canonical serialization of `labels` excluding the dimension's own keys —
/// two alerts with the same type fingerprint differ only in the aggregation
/// dimension (e.g. same alert on different hosts).
pub fn type_fingerprint(labels: &Labels, aggregate_by: &str) -> String {
    let excluded = dimension_keys(aggregate_by);
    let filtered: Labels = labels
        .iter()
        .filter(|(k, _)| !excluded.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::to_string(&filtered).unwrap_or_default()
}

fn instance_head(labels: &Labels) -> String {
    labels
        .get("instance")
        .map(|v| v.split(':').next().unwrap_or(v).to_string())
        .unwrap_or_default()
}

fn instance_port(labels: &Labels) -> String {
    labels
        .get("instance")
        .and_then(|v| v.rsplit_once(':'))
        .map(|(_, port)| port.to_string())
        .unwrap_or_default()
}

pub fn aggregation_key(labels: &Labels, aggregate_by: &str) -> String {
    match aggregate_by {
        "hostname" => labels
            .get("hostname")
            .or_else(|| labels.get("host"))
            .cloned()
            .unwrap_or_else(|| instance_head(labels)),
        "ip" => labels.get("ip").cloned().unwrap_or_else(|| instance_head(labels)),
        "port" => labels.get("port").cloned().unwrap_or_else(|| instance_port(labels)),
        other => labels.get(other).cloned().unwrap_or_default(),
    }
}

/// Collects the aggregation keys of every candidate alert that shares the
/// triggering alert's type fingerprint, always including the trigger itself.
pub fn collect_keys<'a>(
    trigger: &Alert,
    trigger_labels: &Labels,
    aggregate_by: &str,
    candidates: impl Iterator<Item = &'a Alert>,
    matches_rule: impl Fn(&Alert) -> bool,
) -> Vec<String> {
    let target_fingerprint = type_fingerprint(trigger_labels, aggregate_by);
    let mut keys: HashSet<String> = HashSet::new();

    let trigger_key = aggregation_key(trigger_labels, aggregate_by);
    keys.insert(if trigger_key.is_empty() { trigger.id.clone() } else { trigger_key });

    for candidate in candidates {
        if !matches_rule(candidate) {
            continue;
        }
        let labels = candidate.labels_map();
        if type_fingerprint(&labels, aggregate_by) != target_fingerprint {
            continue;
        }
        let key = aggregation_key(&labels, aggregate_by);
        keys.insert(if key.is_empty() { candidate.id.clone() } else { key });
    }

    let mut sorted: Vec<String> = keys.into_iter().collect();
    sorted.sort();
    sorted
}

#[derive(Default)]
pub struct AggregationDedup {
    last_sent: Mutex<HashMap<(i64, String), DateTime<Utc>>>,
}

impl AggregationDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_skip(&self, rule_id: i64, type_fp: &str, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        let map = self.last_sent.lock().expect("aggregation dedup mutex poisoned");
        map.get(&(rule_id, type_fp.to_string()))
            .is_some_and(|last| now - *last < window)
    }

    pub fn record_sent(&self, rule_id: i64, type_fp: &str, now: DateTime<Utc>) {
        self.last_sent
            .lock()
            .expect("aggregation dedup mutex poisoned")
            .insert((rule_id, type_fp.to_string()), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn hostname_dimension_prefers_hostname_then_host_then_instance() {
        assert_eq!(aggregation_key(&labels(&[("hostname", "h1")]), "hostname"), "h1");
        assert_eq!(aggregation_key(&labels(&[("host", "h2")]), "hostname"), "h2");
        assert_eq!(
            aggregation_key(&labels(&[("instance", "h3:9100")]), "hostname"),
            "h3"
        );
    }

    #[test]
    fn port_dimension_uses_instance_suffix() {
        assert_eq!(aggregation_key(&labels(&[("instance", "host:9100")]), "port"), "9100");
        assert_eq!(aggregation_key(&labels(&[("port", "9200")]), "port"), "9200");
    }

    #[test]
    fn type_fingerprint_excludes_dimension_keys() {
        let a = labels(&[("hostname", "h1"), ("alertname", "disk")]);
        let b = labels(&[("hostname", "h2"), ("alertname", "disk")]);
        assert_eq!(type_fingerprint(&a, "hostname"), type_fingerprint(&b, "hostname"));
    }

    #[test]
    fn dedup_skips_within_window_and_resets_after() {
        let dedup = AggregationDedup::new();
        let now = crate::time::ymd_hms(2026, 1, 1, 0, 0, 0);
        assert!(!dedup.should_skip(1, "fp", now, chrono::Duration::minutes(5)));
        dedup.record_sent(1, "fp", now);
        assert!(dedup.should_skip(1, "fp", now + chrono::Duration::minutes(1), chrono::Duration::minutes(5)));
        assert!(!dedup.should_skip(1, "fp", now + chrono::Duration::minutes(6), chrono::Duration::minutes(5)));
    }
}
