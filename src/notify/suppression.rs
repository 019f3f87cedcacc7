//! Process-local suppression-window state. One mutex, never nested with the
//! scheduler's per-rule state locks (§5).

use crate::models::{Labels, SuppressionConfig};
use crate::time::parse_duration;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct SuppressionTracker {
    expiry: Mutex<HashMap<i64, DateTime<Utc>>>,
}

fn labels_match(labels: &Labels, required: &Labels) -> bool {
    required.iter().all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
}

impl SuppressionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the suppression window for `rule_id` if the
    /// incoming alert matches `sourceLabels`. Must be called for every rule
    /// on every alert, independent of whether the rule ultimately fires.
    pub fn observe(&self, rule_id: i64, config: Option<&SuppressionConfig>, labels: &Labels, now: DateTime<Utc>) {
        let Some(config) = config else { return };
        if config.source_labels.is_empty() || config.duration.trim().is_empty() {
            return;
        }
        if !labels_match(labels, &config.source_labels) {
            return;
        }
        let duration = parse_duration(Some(&config.duration), Duration::ZERO);
        if duration.is_zero() {
            return;
        }
        let expiry = now + chrono::Duration::from_std(duration).unwrap_or_default();
        self.expiry.lock().expect("suppression mutex poisoned").insert(rule_id, expiry);
    }

    /// True if the rule's suppression window is currently active and the
    /// given alert's labels match `suppressedLabels`.
    pub fn is_suppressed(&self, rule_id: i64, config: Option<&SuppressionConfig>, labels: &Labels, now: DateTime<Utc>) -> bool {
        let Some(config) = config else { return false };
        if config.suppressed_labels.is_empty() {
            return false;
        }
        let active = self
            .expiry
            .lock()
            .expect("suppression mutex poisoned")
            .get(&rule_id)
            .is_some_and(|expiry| now < *expiry);
        active && labels_match(labels, &config.suppressed_labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ymd_hms;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn arms_and_suppresses_matching_labels() {
        let tracker = SuppressionTracker::new();
        let config = SuppressionConfig {
            source_labels: labels(&[("role", "gateway")]),
            suppressed_labels: labels(&[("zone", "edge")]),
            duration: "10m".to_string(),
        };
        let now = ymd_hms(2026, 1, 1, 0, 0, 0);

        tracker.observe(1, Some(&config), &labels(&[("role", "gateway")]), now);
        assert!(tracker.is_suppressed(1, Some(&config), &labels(&[("zone", "edge")]), now));

        let later = now + chrono::Duration::minutes(20);
        assert!(!tracker.is_suppressed(1, Some(&config), &labels(&[("zone", "edge")]), later));
    }

    #[test]
    fn non_matching_source_labels_do_not_arm() {
        let tracker = SuppressionTracker::new();
        let config = SuppressionConfig {
            source_labels: labels(&[("role", "gateway")]),
            suppressed_labels: labels(&[("zone", "edge")]),
            duration: "10m".to_string(),
        };
        let now = ymd_hms(2026, 1, 1, 0, 0, 0);
        tracker.observe(1, Some(&config), &labels(&[("role", "other")]), now);
        assert!(!tracker.is_suppressed(1, Some(&config), &labels(&[("zone", "edge")]), now));
    }
}
