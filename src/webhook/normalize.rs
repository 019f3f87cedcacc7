//! Normalizes pushed payloads into the shared `AlertDraft` shape (§4.7).
//! Two wire shapes are accepted: Alertmanager-flavored (`prometheus`,
//! `victoriametrics`) and a generic flavor (`elasticsearch`, `doris`).

use crate::fingerprint::webhook_fingerprint;
use crate::models::{AlertStatus, Labels};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AlertmanagerPayload {
    #[serde(default)]
    pub alerts: Vec<AlertmanagerAlert>,
}

#[derive(Debug, Deserialize)]
pub struct AlertmanagerAlert {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(rename = "endsAt")]
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct GenericPayload {
    #[serde(default)]
    pub alerts: Vec<GenericAlert>,
}

#[derive(Debug, Deserialize)]
pub struct GenericAlert {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

pub struct NormalizedAlert {
    pub status: AlertStatus,
    pub title: String,
    pub severity: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub external_id: String,
}

fn title_from_labels(labels: &Labels) -> String {
    labels
        .get("summary")
        .or_else(|| labels.get("alertname"))
        .cloned()
        .unwrap_or_else(|| "Alert".to_string())
}

impl From<AlertmanagerAlert> for NormalizedAlert {
    fn from(raw: AlertmanagerAlert) -> Self {
        let title = title_from_labels(&raw.labels);
        let severity = raw.labels.get("severity").cloned().unwrap_or_else(|| "warning".to_string());
        let status = AlertStatus::parse(&raw.status);
        Self {
            status,
            severity,
            starts_at: raw.starts_at.unwrap_or_else(Utc::now),
            ends_at: raw.ends_at,
            external_id: String::new(),
            labels: raw.labels,
            annotations: raw.annotations,
            title,
        }
    }
}

impl From<GenericAlert> for NormalizedAlert {
    fn from(raw: GenericAlert) -> Self {
        let title = raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| title_from_labels(&raw.labels));
        let severity = raw
            .severity
            .filter(|s| !s.trim().is_empty())
            .or_else(|| raw.labels.get("severity").cloned())
            .unwrap_or_else(|| "warning".to_string());
        let status = AlertStatus::parse(&raw.status);
        Self {
            status,
            severity,
            starts_at: raw.starts_at.unwrap_or_else(Utc::now),
            ends_at: raw.ends_at,
            external_id: String::new(),
            labels: raw.labels,
            annotations: raw.annotations,
            title,
        }
    }
}

impl NormalizedAlert {
    pub fn with_fingerprint(mut self, source_id: i64) -> Self {
        self.external_id = webhook_fingerprint(source_id, &self.title, &self.labels);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alertmanager_alert_falls_back_title_and_severity() {
        let raw = AlertmanagerAlert {
            status: "firing".to_string(),
            labels: [("alertname".to_string(), "HighCPU".to_string())].into_iter().collect(),
            annotations: Labels::new(),
            starts_at: None,
            ends_at: None,
        };
        let normalized: NormalizedAlert = raw.into();
        assert_eq!(normalized.title, "HighCPU");
        assert_eq!(normalized.severity, "warning");
        assert_eq!(normalized.status, AlertStatus::Firing);
    }

    #[test]
    fn generic_alert_prefers_explicit_title_and_severity() {
        let raw = GenericAlert {
            title: Some("Disk full".to_string()),
            severity: Some("critical".to_string()),
            status: "resolved".to_string(),
            labels: Labels::new(),
            annotations: Labels::new(),
            starts_at: None,
            ends_at: None,
        };
        let normalized: NormalizedAlert = raw.into();
        assert_eq!(normalized.title, "Disk full");
        assert_eq!(normalized.severity, "critical");
        assert_eq!(normalized.status, AlertStatus::Resolved);
    }
}
