//! Ticket gating (§4.6): decide whether an alert occurrence should open a
//! Jira ticket, honoring the occurrence threshold and the one-ticket-per-
//! logical-alert uniqueness constraint.

use crate::channels::jira;
use crate::models::RuleRow;
use crate::store::Store;

pub async fn maybe_create_ticket(
    store: &Store,
    http: &reqwest::Client,
    rule: &RuleRow,
    source_id: i64,
    external_id: &str,
    title: &str,
    body: &str,
) {
    if !rule.jira_enabled || rule.jira_after_n <= 0 {
        return;
    }
    let Some(config_json) = rule.jira_config_str() else {
        return;
    };

    let occurrences = match store.occurrence_count(source_id, external_id).await {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(error = %err, "failed to count alert occurrences for ticket gating");
            return;
        }
    };
    if occurrences < rule.jira_after_n as i64 {
        return;
    }

    match store.jira_ticket_exists(rule.id, source_id, external_id).await {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(error = %err, "failed to check existing jira ticket");
            return;
        }
    }

    match jira::create_ticket(http, &config_json, title, body).await {
        Ok(issue_key) => {
            if let Err(err) = store
                .record_jira_ticket(rule.id, source_id, external_id, &issue_key)
                .await
            {
                tracing::warn!(error = %err, "failed to persist jira ticket record");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, rule_id = rule.id, "jira ticket creation failed");
        }
    }
}
