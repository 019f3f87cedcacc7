use crate::models::ThresholdLevel;

/// First-hit threshold matching (§4.4): unknown operators default to `>`.
pub fn compare(value: f64, operator: &str, threshold: f64) -> bool {
    match operator {
        ">=" => value >= threshold,
        "<" => value < threshold,
        "<=" => value <= threshold,
        "==" => (value - threshold).abs() < f64::EPSILON,
        "!=" => (value - threshold).abs() >= f64::EPSILON,
        _ => value > threshold,
    }
}

/// Returns the first matching level, if any. `None` with a non-empty level
/// list means the series should be excluded from the current firing set.
pub fn match_threshold<'a>(value: f64, levels: &'a [ThresholdLevel]) -> Option<&'a ThresholdLevel> {
    levels.iter().find(|level| compare(value, &level.operator, level.value))
}

/// Rounds to two decimals using half-away-from-zero, matching the
/// "rounded value changed" re-processing trigger in §4.2.
pub fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(op: &str, value: f64) -> ThresholdLevel {
        ThresholdLevel {
            operator: op.to_string(),
            value,
            severity: "warning".to_string(),
            channel_ids: Vec::new(),
        }
    }

    #[test]
    fn compare_handles_all_operators() {
        assert!(compare(5.0, ">", 3.0));
        assert!(compare(5.0, ">=", 5.0));
        assert!(compare(2.0, "<", 3.0));
        assert!(compare(3.0, "<=", 3.0));
        assert!(compare(3.0, "==", 3.0));
        assert!(compare(3.0, "!=", 4.0));
    }

    #[test]
    fn unknown_operator_defaults_to_gt() {
        assert!(compare(5.0, "~=", 3.0));
        assert!(!compare(2.0, "~=", 3.0));
    }

    #[test]
    fn match_threshold_is_first_hit() {
        let levels = vec![level(">", 90.0), level(">", 70.0)];
        assert_eq!(match_threshold(95.0, &levels).unwrap().value, 90.0);
        assert_eq!(match_threshold(75.0, &levels).unwrap().value, 70.0);
        assert!(match_threshold(10.0, &levels).is_none());
    }

    #[test]
    fn round_2dp_keeps_two_decimals() {
        assert_eq!(round_2dp(2.344), 2.34);
        assert_eq!(round_2dp(97.219), 97.22);
        assert_eq!(round_2dp(0.0), 0.0);
    }
}
