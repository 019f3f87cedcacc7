pub mod normalize;

use crate::models::AlertStatus;
use crate::notify::NotificationEngine;
use crate::store::{AlertDraft, Store};
use chrono::Utc;
use normalize::NormalizedAlert;

#[derive(Debug, Clone, Copy)]
pub struct IngressOutcome {
    pub received: usize,
    pub created: usize,
}

pub async fn ingest(
    store: &Store,
    notify: &NotificationEngine,
    source_id: i64,
    source_type: &str,
    alerts: Vec<NormalizedAlert>,
) -> IngressOutcome {
    let mut created = 0;
    let received = alerts.len();

    for raw in alerts {
        let normalized = raw.with_fingerprint(source_id);
        match ingest_one(store, notify, source_id, source_type, normalized).await {
            Ok(true) => created += 1,
            Ok(false) => {}
            Err(err) => tracing::error!(error = %err, source_id, "failed to ingest webhook alert"),
        }
    }

    IngressOutcome { received, created }
}

async fn ingest_one(
    store: &Store,
    notify: &NotificationEngine,
    source_id: i64,
    source_type: &str,
    normalized: NormalizedAlert,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let existing = store.firing_alert(source_id, &normalized.external_id).await?;

    let (id, is_new) = match &existing {
        Some(row) => (row.id.clone(), false),
        None => (Store::new_alert_id(), true),
    };

    let draft = AlertDraft {
        id,
        source_id,
        source_type: source_type.to_string(),
        external_id: normalized.external_id.clone(),
        title: normalized.title,
        severity: normalized.severity,
        labels: normalized.labels,
        annotations: normalized.annotations,
        now,
    };

    let status = match normalized.status {
        AlertStatus::Resolved => "resolved",
        AlertStatus::Firing => "firing",
    };
    let resolved_at = if matches!(normalized.status, AlertStatus::Resolved) {
        Some(normalized.ends_at.unwrap_or(now))
    } else {
        None
    };

    // A resolved webhook for a series we never saw firing still gets a
    // resolved-only row, preserving history even without a prior firing event.
    let alert = store.upsert_webhook_alert(draft, status, resolved_at).await?;
    notify.process(alert).await;

    Ok(is_new)
}
