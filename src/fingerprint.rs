//! Deterministic alert identity: join the component strings with `|` and
//! take the full hex digest of a SHA-256 hash, used as the external alert
//! id and so needs full collision resistance rather than a shortened form.

use crate::models::Labels;
use sha2::{Digest, Sha256};

/// `labels` serialized with keys in lexicographic order. `serde_json::Map`
/// is backed by a `BTreeMap` unless the `preserve_order` feature is enabled
/// (it is not, here), so a plain `to_string()` is already canonical.
fn canonical_labels(labels: &Labels) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "{}".to_string())
}

/// Fingerprint used by the rule scheduler: includes the rule id (so the same
/// series under different rules produces distinct alerts) and, when the
/// series carries neither an `instance` nor a `job` label, a result index to
/// disambiguate otherwise-identical anonymous series within one query response.
pub fn scheduler_fingerprint(
    source_id: i64,
    rule_id: i64,
    title: &str,
    labels: &Labels,
    result_index: usize,
) -> String {
    let anonymous = labels.get("instance").map(String::as_str).unwrap_or("").is_empty()
        && labels.get("job").map(String::as_str).unwrap_or("").is_empty();

    let mut parts = vec![
        source_id.to_string(),
        rule_id.to_string(),
        title.to_string(),
        canonical_labels(labels),
    ];
    if anonymous {
        parts.push(result_index.to_string());
    }
    digest(&parts)
}

/// Fingerprint used by webhook ingress: no rule id, no result index.
pub fn webhook_fingerprint(source_id: i64, title: &str, labels: &Labels) -> String {
    let parts = vec![
        source_id.to_string(),
        title.to_string(),
        canonical_labels(labels),
    ];
    digest(&parts)
}

fn digest(parts: &[String]) -> String {
    let payload = parts.join("|");
    let hash = Sha256::digest(payload.as_bytes());
    format!("{hash:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn same_inputs_produce_same_fingerprint() {
        let l = labels(&[("instance", "a:9100"), ("job", "node")]);
        let a = scheduler_fingerprint(1, 10, "High CPU", &l, 0);
        let b = scheduler_fingerprint(1, 10, "High CPU", &l, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn different_rule_ids_diverge() {
        let l = labels(&[("instance", "a:9100")]);
        let a = scheduler_fingerprint(1, 10, "High CPU", &l, 0);
        let b = scheduler_fingerprint(1, 11, "High CPU", &l, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn anonymous_series_use_result_index() {
        let l = labels(&[("foo", "bar")]);
        let a = scheduler_fingerprint(1, 10, "Alert", &l, 0);
        let b = scheduler_fingerprint(1, 10, "Alert", &l, 1);
        assert_ne!(a, b, "anonymous series without instance/job must disambiguate by index");
    }

    #[test]
    fn non_anonymous_series_ignore_result_index() {
        let l = labels(&[("instance", "a:9100")]);
        let a = scheduler_fingerprint(1, 10, "Alert", &l, 0);
        let b = scheduler_fingerprint(1, 10, "Alert", &l, 7);
        assert_eq!(a, b, "instance label already disambiguates, index must not matter");
    }

    #[test]
    fn label_key_order_does_not_matter() {
        let l1 = labels(&[("a", "1"), ("b", "2")]);
        let l2 = labels(&[("b", "2"), ("a", "1")]);
        assert_eq!(webhook_fingerprint(1, "t", &l1), webhook_fingerprint(1, "t", &l2));
    }

    #[test]
    fn webhook_fingerprint_has_no_rule_component() {
        let l = labels(&[("instance", "a")]);
        let a = scheduler_fingerprint(1, 10, "t", &l, 0);
        let b = webhook_fingerprint(1, "t", &l);
        assert_ne!(a, b);
    }
}
