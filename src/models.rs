use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "resolved" | "ok" => Self::Resolved,
            _ => Self::Firing,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Alert {
    pub id: String,
    pub source_id: i64,
    pub source_type: String,
    pub external_id: String,
    pub title: String,
    pub severity: String,
    pub status: String,
    pub firing_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub labels: serde_json::Value,
    pub annotations: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn labels_map(&self) -> Labels {
        serde_json::from_value(self.labels.clone()).unwrap_or_default()
    }

    pub fn annotations_map(&self) -> Labels {
        serde_json::from_value(self.annotations.clone()).unwrap_or_default()
    }

    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdLevel {
    pub operator: String,
    pub value: f64,
    pub severity: String,
    #[serde(default)]
    pub channel_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludeWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionConfig {
    #[serde(default)]
    pub source_labels: Labels,
    #[serde(default)]
    pub suppressed_labels: Labels,
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    pub id: i64,
    pub enabled: bool,
    pub priority: i32,
    pub datasource_ids: serde_json::Value,
    pub query_language: Option<String>,
    pub query_expression: Option<String>,
    pub match_labels: serde_json::Value,
    pub match_severity: Option<String>,
    pub channel_ids: serde_json::Value,
    pub template_id: Option<i64>,
    pub check_interval: Option<String>,
    pub duration: Option<String>,
    pub exclude_windows: serde_json::Value,
    pub recovery_notify: bool,
    pub send_interval: Option<String>,
    pub aggregation_enabled: bool,
    pub aggregate_by: Option<String>,
    pub aggregate_window: Option<String>,
    pub suppression: serde_json::Value,
    pub thresholds: serde_json::Value,
    pub jira_enabled: bool,
    pub jira_after_n: i32,
    pub jira_config: serde_json::Value,
    pub name: String,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl RuleRow {
    pub fn datasource_ids(&self) -> Vec<i64> {
        serde_json::from_value(self.datasource_ids.clone()).unwrap_or_default()
    }

    pub fn channel_ids(&self) -> Vec<i64> {
        serde_json::from_value(self.channel_ids.clone()).unwrap_or_default()
    }

    pub fn match_labels(&self) -> Labels {
        serde_json::from_value(self.match_labels.clone()).unwrap_or_default()
    }

    pub fn exclude_windows(&self) -> Vec<ExcludeWindow> {
        serde_json::from_value(self.exclude_windows.clone()).unwrap_or_default()
    }

    /// Disabled when the stored value is null, empty, or the literal strings
    /// `"null"`/`"[]"` left over from legacy form submission.
    pub fn thresholds(&self) -> Vec<ThresholdLevel> {
        match &self.thresholds {
            serde_json::Value::String(s) if s == "null" || s == "[]" || s.trim().is_empty() => {
                Vec::new()
            }
            serde_json::Value::Null => Vec::new(),
            value => serde_json::from_value(value.clone()).unwrap_or_default(),
        }
    }

    pub fn suppression(&self) -> Option<SuppressionConfig> {
        if self.suppression.is_null() {
            return None;
        }
        serde_json::from_value(self.suppression.clone()).ok()
    }

    pub fn jira_config_str(&self) -> Option<String> {
        match &self.jira_config {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::Object(map) if map.is_empty() => None,
            value => Some(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DatasourceRow {
    pub id: i64,
    pub source_type: String,
    pub base_url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub id: i64,
    pub channel_type: String,
    pub config: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AlertSendRecord {
    pub alert_id: String,
    pub channel_id: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub id: i64,
    pub is_default: bool,
    pub body: String,
}
