//! Notification engine (§4.5): matches firing/resolved alerts against
//! enabled rules and dispatches through channel senders under the rules'
//! duration, exclude-window, suppression, aggregation, and rate-limit gates.
//!
//! Dispatch runs through a bounded queue drained by a fixed pool of
//! consumer tasks spawned from `start(cancel)`.

pub mod aggregation;
pub mod suppression;
pub mod template;
pub mod ticket;

use crate::channels::{self, send_with_retry, ChannelSender};
use crate::config::WatchgateConfig;
use crate::models::{Alert, AlertSendRecord, AlertStatus, Labels, RuleRow};
use crate::store::Store;
use aggregation::AggregationDedup;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use suppression::SuppressionTracker;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const QUEUE_LOG_CONTEXT: &str = "notification queue";
const RECOVERY_DEDUP_WINDOW_SECONDS: i64 = 120;
const ALERT_TITLE_PREFIX: &str = "\u{3010}\u{7cfb}\u{7edf}\u{544a}\u{8b66}\u{3011}"; // "【系统告警】"

#[derive(Clone)]
pub struct NotificationEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    http: reqwest::Client,
    config: WatchgateConfig,
    senders: HashMap<String, Arc<dyn ChannelSender>>,
    suppression: SuppressionTracker,
    aggregation: AggregationDedup,
    queue: mpsc::Sender<Alert>,
}

impl NotificationEngine {
    pub fn new(store: Store, http: reqwest::Client, config: WatchgateConfig, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(config.notify_queue_capacity);
        let senders = channels::build_senders(http.clone(), config.rate_limit_rps, config.rate_limit_burst);
        let inner = Arc::new(Inner {
            store,
            http,
            config,
            senders,
            suppression: SuppressionTracker::new(),
            aggregation: AggregationDedup::new(),
            queue: tx,
        });
        let engine = Self { inner };
        engine.spawn_workers(rx, cancel);
        engine
    }

    fn spawn_workers(&self, rx: mpsc::Receiver<Alert>, cancel: CancellationToken) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..self.inner.config.notify_workers {
            let engine = self.clone();
            let rx = rx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = async { rx.lock().await.recv().await } => next,
                    };
                    match next {
                        Some(alert) => engine.process(alert).await,
                        None => break,
                    }
                }
                tracing::debug!(worker_id, "notification worker stopped");
            });
        }
    }

    /// Non-blocking enqueue; falls back to a detached task when the bounded
    /// queue is saturated so no alert is silently dropped.
    pub fn process_async(&self, alert: Alert) {
        match self.inner.queue.try_send(alert) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(alert)) => {
                tracing::warn!(context = QUEUE_LOG_CONTEXT, "queue saturated, spawning detached task");
                let engine = self.clone();
                tokio::spawn(async move { engine.process(alert).await });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!(context = QUEUE_LOG_CONTEXT, "queue closed, dropping alert");
            }
        }
    }

    pub async fn process(&self, alert: Alert) {
        let now = Utc::now();

        match self.inner.store.active_silence(&alert.id, now).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "failed to check alert silence"),
        }

        let rules = match self.inner.store.enabled_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                tracing::error!(error = %err, "failed to load rules for notification");
                return;
            }
        };

        let labels = alert.labels_map();

        for rule in &rules {
            self.inner
                .suppression
                .observe(rule.id, rule.suppression().as_ref(), &labels, now);

            if !rule_matches(rule, &alert, &labels) {
                continue;
            }

            let channel_ids = resolve_channel_ids(rule, &alert);
            if channel_ids.is_empty() {
                continue;
            }

            if alert.status == AlertStatus::Resolved.as_str() {
                if rule.recovery_notify {
                    self.dispatch_recovery(rule, &alert, &labels, &channel_ids, now).await;
                }
                continue;
            }

            if !alert.is_firing() {
                continue;
            }

            if !self.passes_duration_gate(rule, &alert, now) {
                continue;
            }
            if self.is_in_exclude_window(rule, now) {
                continue;
            }
            if self
                .inner
                .suppression
                .is_suppressed(rule.id, rule.suppression().as_ref(), &labels, now)
            {
                continue;
            }

            let title = display_title(&alert.title);
            let sent_at_label = crate::time::format_local(now, self.inner.config.tz());
            let body = self.render_body(rule, &alert, &labels, now, false).await;
            let body = format!("{body}\n\n\u{53d1}\u{9001}\u{65f6}\u{95f4}: {sent_at_label}");

            ticket::maybe_create_ticket(
                &self.inner.store,
                &self.inner.http,
                rule,
                alert.source_id,
                &alert.external_id,
                &title,
                &body,
            )
            .await;

            if rule.aggregation_enabled && rule.aggregate_by.as_deref().is_some_and(|s| !s.is_empty()) {
                self.dispatch_aggregated(rule, &alert, &labels, &title, &body, &channel_ids, now)
                    .await;
            } else {
                self.dispatch_direct(rule, &alert, &title, &body, &channel_ids, now).await;
            }
        }
    }

    async fn render_body(&self, rule: &RuleRow, alert: &Alert, labels: &Labels, now: DateTime<Utc>, is_recovery: bool) -> String {
        let body_template = self.resolve_template(rule).await;
        let annotations = alert.annotations_map();
        let value = annotations.get("value").cloned().unwrap_or_default();
        let data = template::RenderData {
            alert_id: &alert.id,
            title: &alert.title,
            severity: &alert.severity,
            labels,
            start_at: alert.firing_at,
            sent_at: now,
            source_type: &alert.source_type,
            description: "",
            value: &value,
            is_recovery,
            resolved_at: alert.resolved_at,
            rule_description: &rule.name,
        };
        template::render(&body_template, &data)
    }

    /// Template resolution order (§4.11): rule's template, auto-rebinding to
    /// the default if the bound id is stale; then the default; then the
    /// hard-coded minimal body.
    async fn resolve_template(&self, rule: &RuleRow) -> String {
        if let Some(template_id) = rule.template_id {
            match self.inner.store.template_by_id(template_id).await {
                Ok(Some(row)) => return row.body,
                Ok(None) => {
                    tracing::warn!(rule_id = rule.id, template_id, "rule template missing, falling back to default");
                }
                Err(err) => tracing::warn!(error = %err, "failed to load rule template"),
            }
        }
        match self.inner.store.default_template().await {
            Ok(Some(row)) => row.body,
            Ok(None) => template::MINIMAL_BODY_TEMPLATE.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load default template");
                template::MINIMAL_BODY_TEMPLATE.to_string()
            }
        }
    }

    fn passes_duration_gate(&self, rule: &RuleRow, alert: &Alert, now: DateTime<Utc>) -> bool {
        let duration = crate::time::parse_duration(rule.duration.as_deref(), StdDuration::ZERO);
        if duration.is_zero() {
            return true;
        }
        now - alert.firing_at >= ChronoDuration::from_std(duration).unwrap_or_default()
    }

    fn is_in_exclude_window(&self, rule: &RuleRow, now: DateTime<Utc>) -> bool {
        let minute = crate::time::minute_of_day(now, self.inner.config.tz());
        rule.exclude_windows().iter().any(|w| {
            match (crate::time::parse_hhmm(&w.start), crate::time::parse_hhmm(&w.end)) {
                (Some(start), Some(end)) => crate::time::minute_in_window(minute, start, end),
                _ => false,
            }
        })
    }

    /// Per-alert-per-channel send-interval throttle (§4.5): distinct from
    /// the token-bucket rate limiter in `channels::rate_limiter`, which
    /// throttles the channel transport, not the alert/channel pair.
    async fn is_rate_limited(&self, rule: &RuleRow, alert_id: &str, channel_id: i64, now: DateTime<Utc>) -> bool {
        let interval = crate::time::parse_duration(rule.send_interval.as_deref(), StdDuration::ZERO);
        if interval.is_zero() {
            return false;
        }
        let since = now - ChronoDuration::from_std(interval).unwrap_or_default();
        match self.inner.store.recent_success_count(alert_id, channel_id, since).await {
            Ok(count) => count >= 1,
            Err(err) => {
                tracing::warn!(error = %err, "failed to check send rate limit");
                false
            }
        }
    }

    async fn send_one(&self, alert_id: &str, channel_id: i64, title: &str, body: &str, is_recovery: bool, now: DateTime<Utc>) {
        let channel = match self.inner.store.channel_by_id(channel_id).await {
            Ok(Some(channel)) if channel.enabled => channel,
            Ok(Some(_)) => {
                self.record(alert_id, channel_id, false, Some("channel disabled".to_string()), now).await;
                return;
            }
            Ok(None) => {
                self.record(alert_id, channel_id, false, Some("channel not found".to_string()), now).await;
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load channel");
                return;
            }
        };

        let Some(sender) = self.inner.senders.get(&channel.channel_type) else {
            self.record(alert_id, channel_id, false, Some(format!("unsupported channel type {}", channel.channel_type)), now).await;
            return;
        };

        match send_with_retry(sender.as_ref(), &channel.config, title, body, is_recovery).await {
            Ok(()) => self.record(alert_id, channel_id, true, None, now).await,
            Err(err) => self.record(alert_id, channel_id, false, Some(err.to_string()), now).await,
        }
    }

    async fn record(&self, alert_id: &str, channel_id: i64, success: bool, error_message: Option<String>, now: DateTime<Utc>) {
        let record = AlertSendRecord {
            alert_id: alert_id.to_string(),
            channel_id,
            success,
            error_message,
        };
        if let Err(err) = self.inner.store.record_send(&record, now).await {
            tracing::warn!(error = %err, "failed to persist send record");
        }
    }

    async fn dispatch_recovery(&self, rule: &RuleRow, alert: &Alert, labels: &Labels, channel_ids: &[i64], now: DateTime<Utc>) {
        let title = display_title(&alert.title);
        let body = self.render_body(rule, alert, labels, now, true).await;
        let since = now - ChronoDuration::seconds(RECOVERY_DEDUP_WINDOW_SECONDS);

        for &channel_id in channel_ids {
            match self.inner.store.recent_success_count(&alert.id, channel_id, since).await {
                Ok(count) if count >= 1 => continue,
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "failed to check recovery dedup window"),
            }
            self.send_one(&alert.id, channel_id, &title, &body, true, now).await;
        }
    }

    async fn dispatch_direct(&self, rule: &RuleRow, alert: &Alert, title: &str, body: &str, channel_ids: &[i64], now: DateTime<Utc>) {
        for &channel_id in channel_ids {
            if self.is_rate_limited(rule, &alert.id, channel_id, now).await {
                continue;
            }
            self.send_one(&alert.id, channel_id, title, body, false, now).await;
        }
    }

    async fn dispatch_aggregated(
        &self,
        rule: &RuleRow,
        alert: &Alert,
        labels: &Labels,
        title: &str,
        body: &str,
        channel_ids: &[i64],
        now: DateTime<Utc>,
    ) {
        let aggregate_by = rule.aggregate_by.clone().unwrap_or_default();
        let window = crate::time::parse_duration(rule.aggregate_window.as_deref(), StdDuration::from_secs(300));
        let window_chrono = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::minutes(5));

        let type_fp = aggregation::type_fingerprint(labels, &aggregate_by);
        if self.inner.aggregation.should_skip(rule.id, &type_fp, now, window_chrono) {
            return;
        }

        let candidates = match self.inner.store.recent_firing_alerts_since(now - window_chrono).await {
            Ok(alerts) => alerts,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load aggregation candidates");
                Vec::new()
            }
        };

        let keys = aggregation::collect_keys(alert, labels, &aggregate_by, candidates.iter(), |candidate| {
            rule_matches(rule, candidate, &candidate.labels_map())
        });

        let agg_title = format!("{title} ({} {aggregate_by})", keys.len());
        let agg_body = format!("{body}\n\n{aggregate_by} list: {}", keys.join(", "));

        for &channel_id in channel_ids {
            if self.is_rate_limited(rule, &alert.id, channel_id, now).await {
                continue;
            }
            self.send_one(&alert.id, channel_id, &agg_title, &agg_body, false, now).await;
        }

        self.inner.aggregation.record_sent(rule.id, &type_fp, now);
    }
}

fn rule_matches(rule: &RuleRow, alert: &Alert, labels: &Labels) -> bool {
    if let Some(severity) = rule.match_severity.as_deref() {
        if !severity.is_empty() && severity != alert.severity {
            return false;
        }
    }
    let datasource_ids = rule.datasource_ids();
    if !datasource_ids.is_empty() && !datasource_ids.contains(&alert.source_id) {
        return false;
    }
    rule.match_labels().iter().all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
}

/// Prefers the per-threshold-level channel override carried in the
/// `threshold_channel_ids` annotation over the rule's own channel list.
fn resolve_channel_ids(rule: &RuleRow, alert: &Alert) -> Vec<i64> {
    let annotations = alert.annotations_map();
    if let Some(raw) = annotations.get("threshold_channel_ids") {
        if let Ok(ids) = serde_json::from_str::<Vec<i64>>(raw) {
            if !ids.is_empty() {
                return ids;
            }
        }
    }
    rule.channel_ids()
}

fn display_title(title: &str) -> String {
    let stripped = title.strip_prefix(ALERT_TITLE_PREFIX).unwrap_or(title).trim();
    if stripped.is_empty() {
        "Alert".to_string()
    } else {
        stripped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn display_title_strips_prefix_and_trims() {
        assert_eq!(display_title("\u{3010}\u{7cfb}\u{7edf}\u{544a}\u{8b66}\u{3011} disk full"), "disk full");
        assert_eq!(display_title(""), "Alert");
        assert_eq!(display_title("plain"), "plain");
    }

    #[test]
    fn resolve_channel_ids_prefers_threshold_override() {
        let alert = Alert {
            id: "a".into(),
            source_id: 1,
            source_type: "prometheus".into(),
            external_id: "fp".into(),
            title: "t".into(),
            severity: "critical".into(),
            status: "firing".into(),
            firing_at: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
            resolved_at: None,
            labels: serde_json::json!({}),
            annotations: serde_json::json!({"threshold_channel_ids": "[7,8]"}),
            created_at: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
            updated_at: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
        };
        let rule = sample_rule();
        assert_eq!(resolve_channel_ids(&rule, &alert), vec![7, 8]);
    }

    fn sample_rule() -> RuleRow {
        RuleRow {
            id: 1,
            enabled: true,
            priority: 0,
            datasource_ids: serde_json::json!([]),
            query_language: None,
            query_expression: Some("up".into()),
            match_labels: serde_json::json!({}),
            match_severity: None,
            channel_ids: serde_json::json!([1, 2]),
            template_id: None,
            check_interval: None,
            duration: None,
            exclude_windows: serde_json::json!([]),
            recovery_notify: true,
            send_interval: None,
            aggregation_enabled: false,
            aggregate_by: None,
            aggregate_window: None,
            suppression: serde_json::Value::Null,
            thresholds: serde_json::Value::Null,
            jira_enabled: false,
            jira_after_n: 0,
            jira_config: serde_json::Value::Null,
            name: "rule".into(),
            last_run_at: None,
        }
    }

    #[test]
    fn rule_matches_requires_all_match_labels() {
        let mut rule = sample_rule();
        rule.match_labels = serde_json::json!({"env": "prod"});
        let alert = Alert {
            id: "a".into(),
            source_id: 1,
            source_type: "prometheus".into(),
            external_id: "fp".into(),
            title: "t".into(),
            severity: "critical".into(),
            status: "firing".into(),
            firing_at: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
            resolved_at: None,
            labels: serde_json::json!({}),
            annotations: serde_json::json!({}),
            created_at: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
            updated_at: crate::time::ymd_hms(2026, 1, 1, 0, 0, 0),
        };
        assert!(!rule_matches(&rule, &alert, &labels(&[("env", "staging")])));
        assert!(rule_matches(&rule, &alert, &labels(&[("env", "prod")])));
    }
}
