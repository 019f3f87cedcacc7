//! Ticket creation is not a notification channel in the §4.9 sense — it is
//! invoked once per gated occurrence, not once per send — so it is a plain
//! async helper rather than a `ChannelSender` impl.

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub base_url: String,
    #[serde(default)]
    pub email: Option<String>,
    pub token: String,
    pub project: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
}

fn default_issue_type() -> String {
    "Bug".to_string()
}

const SUMMARY_MAX_LEN: usize = 255;

fn truncate_summary(title: &str) -> String {
    let summary = format!("[Alert] {title}");
    if summary.chars().count() <= SUMMARY_MAX_LEN {
        return summary;
    }
    let truncated: String = summary.chars().take(SUMMARY_MAX_LEN - 1).collect();
    format!("{truncated}\u{2026}")
}

pub async fn create_ticket(
    http: &reqwest::Client,
    config_json: &str,
    title: &str,
    description: &str,
) -> anyhow::Result<String> {
    let cfg: JiraConfig = serde_json::from_str(config_json).context("invalid jira channel config")?;

    let url = format!("{}/rest/api/3/issue", cfg.base_url.trim_end_matches('/'));
    let payload = serde_json::json!({
        "fields": {
            "project": { "key": cfg.project },
            "summary": truncate_summary(title),
            "issuetype": { "name": cfg.issue_type },
            "description": {
                "type": "doc",
                "version": 1,
                "content": [{
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": description }]
                }]
            }
        }
    });

    let mut request = http.post(&url).json(&payload);
    request = match &cfg.email {
        Some(email) => {
            let basic = BASE64.encode(format!("{email}:{}", cfg.token));
            request.header("Authorization", format!("Basic {basic}"))
        }
        None => request.bearer_auth(&cfg.token),
    };

    let resp = request.send().await?;
    if resp.status().as_u16() != 201 {
        bail!("jira issue creation returned status {}", resp.status());
    }

    #[derive(Deserialize)]
    struct CreateResponse {
        key: String,
    }
    let created: CreateResponse = resp.json().await.context("invalid jira create response")?;
    Ok(created.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_summaries() {
        let title: String = "x".repeat(300);
        let summary = truncate_summary(&title);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_LEN);
        assert!(summary.ends_with('\u{2026}'));
    }

    #[test]
    fn leaves_short_summaries_untouched() {
        let summary = truncate_summary("disk full");
        assert_eq!(summary, "[Alert] disk full");
    }
}
