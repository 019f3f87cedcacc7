//! Rule scheduler (§4.2): one long-lived evaluation task per enabled,
//! queryable rule, reloaded on a periodic tick. Each task runs its own
//! `tokio::select!` loop against a per-rule interval rather than one shared
//! poll loop.

pub mod state_cache;
pub mod types;

use crate::config::WatchgateConfig;
use crate::fingerprint::scheduler_fingerprint;
use crate::models::{Labels, RuleRow};
use crate::notify::NotificationEngine;
use crate::query;
use crate::store::{AlertDraft, Store};
use chrono::Utc;
use rand::Rng;
use state_cache::{SeriesState, StateCache};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const STABLE_REPROCESS_INTERVAL: Duration = Duration::from_secs(60);

pub struct RuleScheduler {
    store: Store,
    notify: NotificationEngine,
    http: reqwest::Client,
    state_cache: StateCache,
    tasks: Mutex<HashMap<i64, CancellationToken>>,
    reload_interval: Duration,
    query_deadline: Duration,
}

impl RuleScheduler {
    pub fn new(store: Store, notify: NotificationEngine, http: reqwest::Client, config: &WatchgateConfig) -> Self {
        Self {
            store,
            notify,
            http,
            state_cache: StateCache::new(),
            tasks: Mutex::new(HashMap::new()),
            reload_interval: Duration::from_secs(config.rule_reload_interval_seconds),
            query_deadline: Duration::from_secs(config.http_request_timeout_seconds),
        }
    }

    pub fn start(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            self.reload().await;
            let mut ticker = tokio::time::interval(self.reload_interval);
            ticker.tick().await; // first tick fires immediately; we already reloaded above
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.stop_all();
                        break;
                    }
                    _ = ticker.tick() => {
                        self.reload().await;
                    }
                }
            }
        });
    }

    fn stop_all(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler tasks lock poisoned");
        for (_, token) in tasks.drain() {
            token.cancel();
        }
    }

    async fn reload(self: &std::sync::Arc<Self>) {
        let rules = match self.store.schedulable_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                tracing::error!(error = %err, "failed to load rules for scheduling");
                return;
            }
        };
        let live_ids: HashSet<i64> = rules.iter().map(|r| r.id).collect();

        let mut tasks = self.tasks.lock().expect("scheduler tasks lock poisoned");
        tasks.retain(|rule_id, token| {
            if live_ids.contains(rule_id) {
                true
            } else {
                token.cancel();
                self.state_cache.drop_rule(*rule_id);
                false
            }
        });

        for rule in rules {
            if tasks.contains_key(&rule.id) {
                continue;
            }
            let token = CancellationToken::new();
            tasks.insert(rule.id, token.clone());
            self.spawn_rule_task(rule.id, token);
        }
    }

    fn spawn_rule_task(self: &std::sync::Arc<Self>, rule_id: i64, token: CancellationToken) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let jitter_ms = rand::thread_rng().gen_range(0..500);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(jitter_ms)) => {}
            }

            loop {
                let interval = scheduler.evaluate_once(rule_id).await;
                let Some(interval) = interval else { break };

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }

    pub async fn run_rule_now(&self, rule_id: i64) {
        self.evaluate_once(rule_id).await;
    }

    /// Returns the sleep duration until the next tick, or `None` if the
    /// rule was disabled/deleted and the task should exit.
    async fn evaluate_once(&self, rule_id: i64) -> Option<Duration> {
        let rule = match self.store.rule_by_id(rule_id).await {
            Ok(Some(rule)) if rule.enabled && rule.query_expression.as_deref().is_some_and(|q| !q.trim().is_empty()) => rule,
            Ok(_) => return None,
            Err(err) => {
                tracing::error!(error = %err, rule_id, "failed to reload rule before evaluation");
                return Some(Duration::from_secs(60));
            }
        };

        let interval = crate::time::check_interval(rule.check_interval.as_deref());

        let Some(&source_id) = rule.datasource_ids().first() else {
            tracing::debug!(rule_id, "rule has no datasource, skipping evaluation");
            return Some(interval);
        };

        let datasource = match self.store.datasource_by_id(source_id).await {
            Ok(Some(ds)) if ds.enabled => ds,
            Ok(Some(_)) => {
                tracing::debug!(rule_id, source_id, "datasource disabled, skipping evaluation");
                return Some(interval);
            }
            Ok(None) => {
                tracing::warn!(rule_id, source_id, "datasource not found, skipping evaluation");
                return Some(interval);
            }
            Err(err) => {
                tracing::error!(error = %err, rule_id, "failed to load datasource");
                return Some(interval);
            }
        };

        let Some(client) = query::client_for(&datasource.source_type, self.http.clone()) else {
            tracing::warn!(rule_id, source_type = %datasource.source_type, "unsupported datasource type");
            return Some(interval);
        };

        let expression = rule.query_expression.clone().unwrap_or_default();
        let result = timeout(
            self.query_deadline,
            client.query(&datasource.base_url, &expression, self.query_deadline),
        )
        .await;

        let query_result = match result {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, rule_id, "datasource query failed");
                return Some(interval);
            }
            Err(_) => {
                tracing::warn!(rule_id, "datasource query timed out");
                return Some(interval);
            }
        };

        let state = self.state_cache.rule_state(rule_id);
        let thresholds = rule.thresholds();
        let mut current_keys = HashSet::new();
        let now = Utc::now();

        for (index, series) in query_result.series.into_iter().enumerate() {
            let severity = if thresholds.is_empty() {
                rule.match_severity.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| "warning".to_string())
            } else {
                match types::match_threshold(series.value, &thresholds) {
                    Some(level) => level.severity.clone(),
                    None => continue,
                }
            };

            let title = format!("{}: {}", rule.name, short_label(&series.labels));
            let external_id = scheduler_fingerprint(source_id, rule_id, &title, &series.labels, index);
            current_keys.insert(external_id.clone());

            let existing = state.get(&external_id);
            let should_process = match &existing {
                None => true,
                Some(prev) => {
                    types::round_2dp(prev.last_value) != types::round_2dp(series.value)
                        || now - prev.last_update >= chrono::Duration::from_std(STABLE_REPROCESS_INTERVAL).unwrap_or_default()
                }
            };
            if !should_process {
                continue;
            }

            let alert_id = match &existing {
                Some(prev) => prev.alert_id.clone(),
                None => match self.store.firing_alert(source_id, &external_id).await {
                    Ok(Some(row)) => row.id,
                    Ok(None) => Store::new_alert_id(),
                    Err(err) => {
                        tracing::warn!(error = %err, rule_id, "failed to look up existing alert");
                        Store::new_alert_id()
                    }
                },
            };

            let mut annotations = Labels::new();
            annotations.insert("value".to_string(), series.value.to_string());
            if let Some(level) = types::match_threshold(series.value, &thresholds) {
                if !level.channel_ids.is_empty() {
                    if let Ok(serialized) = serde_json::to_string(&level.channel_ids) {
                        annotations.insert("threshold_channel_ids".to_string(), serialized);
                    }
                }
            }

            let draft = AlertDraft {
                id: alert_id.clone(),
                source_id,
                source_type: datasource.source_type.clone(),
                external_id: external_id.clone(),
                title,
                severity: severity.clone(),
                labels: series.labels.clone(),
                annotations,
                now,
            };

            match self.store.upsert_scheduler_alert(draft).await {
                Ok(alert) => self.notify.process_async(alert),
                Err(err) => tracing::error!(error = %err, rule_id, "failed to persist alert"),
            }

            state.upsert(
                external_id,
                SeriesState {
                    labels: series.labels,
                    last_value: series.value,
                    last_update: now,
                    alert_id,
                    severity,
                    miss_count: 0,
                },
            );
        }

        self.resolve_missing(rule_id, &state, &current_keys, now).await;

        Some(interval)
    }

    async fn resolve_missing(&self, rule_id: i64, state: &state_cache::RuleState, current_keys: &HashSet<String>, now: chrono::DateTime<Utc>) {
        let to_resolve = state.mark_missing_and_collect_resolutions(current_keys);
        if to_resolve.is_empty() {
            return;
        }

        let mut resolved_fingerprints = Vec::new();
        for fingerprint in &to_resolve {
            let Some(series) = state.get(fingerprint) else { continue };
            match self.store.resolve_alert(&series.alert_id, now).await {
                Ok(Some(alert)) => {
                    self.notify.process_async(alert);
                    resolved_fingerprints.push(fingerprint.clone());
                }
                Ok(None) => resolved_fingerprints.push(fingerprint.clone()),
                Err(err) => tracing::warn!(error = %err, rule_id, "failed to resolve alert"),
            }
        }
        state.remove_all(&resolved_fingerprints);
    }
}

fn short_label(labels: &Labels) -> String {
    labels
        .get("instance")
        .or_else(|| labels.get("__name__"))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

/// Builds the store/notify/http wiring shared by `main` and tests.
pub fn build(store: Store, http: reqwest::Client, config: WatchgateConfig, cancel: CancellationToken) -> (std::sync::Arc<RuleScheduler>, NotificationEngine) {
    let notify = NotificationEngine::new(store.clone(), http.clone(), config.clone(), cancel);
    let scheduler = std::sync::Arc::new(RuleScheduler::new(store, notify.clone(), http, &config));
    (scheduler, notify)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn short_label_prefers_instance_then_name_then_unknown() {
        assert_eq!(short_label(&labels(&[("instance", "a:9100")])), "a:9100");
        assert_eq!(short_label(&labels(&[("__name__", "up")])), "up");
        assert_eq!(short_label(&labels(&[])), "unknown");
    }
}
