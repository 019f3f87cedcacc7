//! Per-rule series state, keyed by fingerprint (§3 "per-series state",
//! §5 "own reader/writer lock"). The outer map from rule id to per-rule
//! state is a second, separate lock (§5: "holders of an entry's lock must
//! not acquire the global lock while holding the entry lock").

use crate::models::Labels;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const RESOLVE_GRACE_PERIOD: u32 = 3;

#[derive(Debug, Clone)]
pub struct SeriesState {
    pub labels: Labels,
    pub last_value: f64,
    pub last_update: DateTime<Utc>,
    pub alert_id: String,
    pub severity: String,
    pub miss_count: u32,
}

#[derive(Default)]
pub struct RuleState {
    series: RwLock<HashMap<String, SeriesState>>,
}

impl RuleState {
    pub fn get(&self, fingerprint: &str) -> Option<SeriesState> {
        self.series.read().expect("rule state lock poisoned").get(fingerprint).cloned()
    }

    pub fn upsert(&self, fingerprint: String, state: SeriesState) {
        self.series.write().expect("rule state lock poisoned").insert(fingerprint, state);
    }

    /// Increments miss count for every tracked series not present in
    /// `current_keys`; returns the fingerprints that crossed the grace
    /// period and should resolve.
    pub fn mark_missing_and_collect_resolutions(&self, current_keys: &std::collections::HashSet<String>) -> Vec<String> {
        let mut state = self.series.write().expect("rule state lock poisoned");
        let mut to_resolve = Vec::new();
        for (fingerprint, series) in state.iter_mut() {
            if current_keys.contains(fingerprint) {
                continue;
            }
            series.miss_count += 1;
            if series.miss_count >= RESOLVE_GRACE_PERIOD {
                to_resolve.push(fingerprint.clone());
            }
        }
        to_resolve
    }

    pub fn remove_all(&self, fingerprints: &[String]) {
        let mut state = self.series.write().expect("rule state lock poisoned");
        for fingerprint in fingerprints {
            state.remove(fingerprint);
        }
    }
}

#[derive(Default)]
pub struct StateCache {
    rules: RwLock<HashMap<i64, Arc<RuleState>>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule_state(&self, rule_id: i64) -> Arc<RuleState> {
        if let Some(existing) = self.rules.read().expect("state cache lock poisoned").get(&rule_id) {
            return existing.clone();
        }
        let mut write = self.rules.write().expect("state cache lock poisoned");
        write.entry(rule_id).or_insert_with(|| Arc::new(RuleState::default())).clone()
    }

    pub fn drop_rule(&self, rule_id: i64) {
        self.rules.write().expect("state cache lock poisoned").remove(&rule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_state(value: f64) -> SeriesState {
        SeriesState {
            labels: Labels::new(),
            last_value: value,
            last_update: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
            alert_id: "a".to_string(),
            severity: "warning".to_string(),
            miss_count: 0,
        }
    }

    #[test]
    fn resolves_only_after_grace_period() {
        let state = RuleState::default();
        state.upsert("fp".to_string(), sample_state(1.0));

        let empty: HashSet<String> = HashSet::new();
        assert!(state.mark_missing_and_collect_resolutions(&empty).is_empty());
        assert!(state.mark_missing_and_collect_resolutions(&empty).is_empty());
        let resolved = state.mark_missing_and_collect_resolutions(&empty);
        assert_eq!(resolved, vec!["fp".to_string()]);
    }

    #[test]
    fn reappearance_resets_miss_count() {
        let state = RuleState::default();
        state.upsert("fp".to_string(), sample_state(1.0));
        let empty: HashSet<String> = HashSet::new();
        state.mark_missing_and_collect_resolutions(&empty);

        let mut present = HashSet::new();
        present.insert("fp".to_string());
        state.upsert("fp".to_string(), sample_state(2.0));
        assert!(state.mark_missing_and_collect_resolutions(&present).is_empty());
        assert_eq!(state.get("fp").unwrap().miss_count, 0);
    }

    #[test]
    fn state_cache_returns_same_instance_per_rule() {
        let cache = StateCache::new();
        let a = cache.rule_state(1);
        let b = cache.rule_state(1);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
