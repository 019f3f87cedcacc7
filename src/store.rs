//! Persistence for alerts, send records, silences, and ticket dedup.
//! Upsert shape: look up the live row inside a transaction, then branch
//! into update-in-place or insert.

use crate::models::{Alert, AlertSendRecord, ChannelRow, DatasourceRow, RuleRow, TemplateRow};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn new_alert_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn enabled_rules(&self) -> Result<Vec<RuleRow>, sqlx::Error> {
        sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, enabled, priority, datasource_ids, query_language, query_expression,
                   match_labels, match_severity, channel_ids, template_id, check_interval,
                   duration, exclude_windows, recovery_notify, send_interval,
                   aggregation_enabled, aggregate_by, aggregate_window, suppression,
                   thresholds, jira_enabled, jira_after_n, jira_config, name, last_run_at
            FROM rules
            WHERE enabled = true
            ORDER BY priority ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn schedulable_rules(&self) -> Result<Vec<RuleRow>, sqlx::Error> {
        Ok(self
            .enabled_rules()
            .await?
            .into_iter()
            .filter(|r| r.query_expression.as_deref().is_some_and(|q| !q.trim().is_empty()))
            .collect())
    }

    pub async fn rule_by_id(&self, rule_id: i64) -> Result<Option<RuleRow>, sqlx::Error> {
        sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, enabled, priority, datasource_ids, query_language, query_expression,
                   match_labels, match_severity, channel_ids, template_id, check_interval,
                   duration, exclude_windows, recovery_notify, send_interval,
                   aggregation_enabled, aggregate_by, aggregate_window, suppression,
                   thresholds, jira_enabled, jira_after_n, jira_config, name, last_run_at
            FROM rules WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn datasource_by_id(&self, id: i64) -> Result<Option<DatasourceRow>, sqlx::Error> {
        sqlx::query_as::<_, DatasourceRow>(
            "SELECT id, source_type, base_url, enabled FROM datasources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn channel_by_id(&self, id: i64) -> Result<Option<ChannelRow>, sqlx::Error> {
        sqlx::query_as::<_, ChannelRow>(
            "SELECT id, channel_type, config, enabled FROM channels WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn template_by_id(&self, id: i64) -> Result<Option<TemplateRow>, sqlx::Error> {
        sqlx::query_as::<_, TemplateRow>("SELECT id, is_default, body FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn default_template(&self) -> Result<Option<TemplateRow>, sqlx::Error> {
        sqlx::query_as::<_, TemplateRow>(
            "SELECT id, is_default, body FROM templates WHERE is_default = true LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn firing_alert(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Alert>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            "SELECT * FROM alerts WHERE source_id = $1 AND external_id = $2 AND status = 'firing'",
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Scheduler-side upsert (§4.3): preserve `firing_at`/`created_at` across
    /// re-sightings; create a fresh row only on true first sighting.
    pub async fn upsert_scheduler_alert(&self, draft: AlertDraft) -> Result<Alert, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Alert> = sqlx::query_as("SELECT * FROM alerts WHERE id = $1")
            .bind(&draft.id)
            .fetch_optional(&mut *tx)
            .await?;

        let alert = if existing.is_some() {
            sqlx::query_as::<_, Alert>(
                r#"
                UPDATE alerts
                SET title = $2, severity = $3, status = 'firing', labels = $4,
                    annotations = $5, updated_at = $6
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(&draft.id)
            .bind(&draft.title)
            .bind(&draft.severity)
            .bind(serde_json::to_value(&draft.labels).unwrap_or_default())
            .bind(serde_json::to_value(&draft.annotations).unwrap_or_default())
            .bind(draft.now)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, Alert>(
                r#"
                INSERT INTO alerts (
                    id, source_id, source_type, external_id, title, severity, status,
                    firing_at, labels, annotations, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 'firing', $7, $8, $9, $7, $7)
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title, severity = EXCLUDED.severity,
                    status = 'firing', labels = EXCLUDED.labels,
                    annotations = EXCLUDED.annotations, updated_at = EXCLUDED.updated_at
                RETURNING *
                "#,
            )
            .bind(&draft.id)
            .bind(draft.source_id)
            .bind(&draft.source_type)
            .bind(&draft.external_id)
            .bind(&draft.title)
            .bind(&draft.severity)
            .bind(draft.now)
            .bind(serde_json::to_value(&draft.labels).unwrap_or_default())
            .bind(serde_json::to_value(&draft.annotations).unwrap_or_default())
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(alert)
    }

    pub async fn resolve_alert(&self, id: &str, resolved_at: DateTime<Utc>) -> Result<Option<Alert>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts SET status = 'resolved', resolved_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'firing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(resolved_at)
        .fetch_optional(&self.pool)
        .await
    }

    /// Webhook-side upsert: callers already resolved whether to create or
    /// update; this performs a plain upsert keyed by id.
    pub async fn upsert_webhook_alert(&self, draft: AlertDraft, status: &str, resolved_at: Option<DateTime<Utc>>) -> Result<Alert, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            INSERT INTO alerts (
                id, source_id, source_type, external_id, title, severity, status,
                firing_at, resolved_at, labels, annotations, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $8, $8)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title, severity = EXCLUDED.severity, status = EXCLUDED.status,
                resolved_at = EXCLUDED.resolved_at, labels = EXCLUDED.labels,
                annotations = EXCLUDED.annotations, updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&draft.id)
        .bind(draft.source_id)
        .bind(&draft.source_type)
        .bind(&draft.external_id)
        .bind(&draft.title)
        .bind(&draft.severity)
        .bind(status)
        .bind(draft.now)
        .bind(resolved_at)
        .bind(serde_json::to_value(&draft.labels).unwrap_or_default())
        .bind(serde_json::to_value(&draft.annotations).unwrap_or_default())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn record_send(&self, record: &AlertSendRecord, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO alert_send_records (alert_id, channel_id, success, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.alert_id)
        .bind(record.channel_id)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_success_count(
        &self,
        alert_id: &str,
        channel_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM alert_send_records
            WHERE alert_id = $1 AND channel_id = $2 AND success = true AND created_at > $3
            "#,
        )
        .bind(alert_id)
        .bind(channel_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn active_silence(&self, alert_id: &str, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM alert_silences WHERE alert_id = $1 AND silence_until > $2 LIMIT 1",
        )
        .bind(alert_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn occurrence_count(&self, source_id: i64, external_id: &str) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM alerts WHERE source_id = $1 AND external_id = $2",
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn jira_ticket_exists(&self, rule_id: i64, source_id: i64, external_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM jira_tickets WHERE rule_id = $1 AND source_id = $2 AND external_id = $3",
        )
        .bind(rule_id)
        .bind(source_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn record_jira_ticket(
        &self,
        rule_id: i64,
        source_id: i64,
        external_id: &str,
        issue_key: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO jira_tickets (rule_id, source_id, external_id, issue_key, created_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (rule_id, source_id, external_id) DO NOTHING
            "#,
        )
        .bind(rule_id)
        .bind(source_id)
        .bind(external_id)
        .bind(issue_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_firing_alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>, sqlx::Error> {
        sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE status = 'firing' AND firing_at >= $1")
            .bind(since)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn retention_days(&self) -> Result<u32, sqlx::Error> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT retention_days FROM settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v.clamp(1, 3650) as u32).unwrap_or(90))
    }

    pub async fn sweep_expired(&self, retention_days: u32) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM alert_send_records
            WHERE alert_id IN (SELECT id FROM alerts WHERE created_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM alerts WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub id: String,
    pub source_id: i64,
    pub source_type: String,
    pub external_id: String,
    pub title: String,
    pub severity: String,
    pub labels: crate::models::Labels,
    pub annotations: crate::models::Labels,
    pub now: DateTime<Utc>,
}
