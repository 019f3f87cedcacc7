//! Two-strategy notification body rendering: a `tera` engine first, a
//! literal placeholder substitution as fallback for bodies written against
//! the older dot-syntax templates.

use crate::models::Labels;
use chrono::{DateTime, Utc};
use tera::{Context, Tera};

pub struct RenderData<'a> {
    pub alert_id: &'a str,
    pub title: &'a str,
    pub severity: &'a str,
    pub labels: &'a Labels,
    pub start_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub source_type: &'a str,
    pub description: &'a str,
    pub value: &'a str,
    pub is_recovery: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub rule_description: &'a str,
}

fn tera_context(data: &RenderData) -> Context {
    let mut ctx = Context::new();
    ctx.insert("alert_id", data.alert_id);
    ctx.insert("title", data.title);
    ctx.insert("severity", data.severity);
    ctx.insert("labels", data.labels);
    ctx.insert("start_at", &data.start_at.to_rfc3339());
    ctx.insert("sent_at", &data.sent_at.to_rfc3339());
    ctx.insert("source_type", data.source_type);
    ctx.insert("description", data.description);
    ctx.insert("value", data.value);
    ctx.insert("is_recovery", &data.is_recovery);
    ctx.insert("resolved_at", &data.resolved_at.map(|t| t.to_rfc3339()));
    ctx.insert("rule_description", data.rule_description);
    ctx
}

/// Go-template-flavored dot syntax (`{{.AlertID}}`, `{{.Labels.host}}`),
/// matched verbatim — the fallback path intentionally does not understand
/// tera syntax.
fn literal_substitute(body: &str, data: &RenderData) -> String {
    let mut out = body
        .replace("{{.AlertID}}", data.alert_id)
        .replace("{{.Title}}", data.title)
        .replace("{{.Severity}}", data.severity)
        .replace("{{.Value}}", data.value)
        .replace("{{.SourceType}}", data.source_type)
        .replace("{{.Description}}", data.description);

    for (key, value) in data.labels {
        out = out.replace(&format!("{{{{.Labels.{key}}}}}"), value);
    }
    out
}

pub const MINIMAL_BODY_TEMPLATE: &str = "AlertID: {{alert_id}}\nTitle: {{title}}\nSeverity: {{severity}}";

/// Renders `body` against `data`, falling back to literal substitution if
/// the template fails to compile or render.
pub fn render(body: &str, data: &RenderData) -> String {
    let mut tera = Tera::default();
    match tera.add_raw_template("notification", body) {
        Ok(()) => match tera.render("notification", &tera_context(data)) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::warn!(error = %err, "template render failed, falling back to literal substitution");
                literal_substitute(body, data)
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "template compile failed, falling back to literal substitution");
            literal_substitute(body, data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ymd_hms;

    fn sample_labels() -> Labels {
        [("host".to_string(), "node-1".to_string())].into_iter().collect()
    }

    fn sample_data(labels: &Labels) -> RenderData<'_> {
        RenderData {
            alert_id: "abc123",
            title: "High CPU",
            severity: "critical",
            labels,
            start_at: ymd_hms(2026, 1, 1, 0, 0, 0),
            sent_at: ymd_hms(2026, 1, 1, 0, 1, 0),
            source_type: "prometheus",
            description: "cpu above threshold",
            value: "97.2",
            is_recovery: false,
            resolved_at: None,
            rule_description: "cpu rule",
        }
    }

    #[test]
    fn renders_tera_template() {
        let labels = sample_labels();
        let out = render("{{ title }} on {{ labels.host }}: {{ value }}", &sample_data(&labels));
        assert_eq!(out, "High CPU on node-1: 97.2");
    }

    #[test]
    fn falls_back_to_literal_substitution_on_bad_tera_syntax() {
        let labels = sample_labels();
        let out = render("{{.Title}} / {{.Labels.host}}", &sample_data(&labels));
        assert_eq!(out, "High CPU / node-1");
    }

    #[test]
    fn minimal_body_renders_with_tera() {
        let labels = sample_labels();
        let out = render(MINIMAL_BODY_TEMPLATE, &sample_data(&labels));
        assert!(out.contains("abc123"));
        assert!(out.contains("High CPU"));
        assert!(out.contains("critical"));
    }
}
