//! Duration-string parsing and local-time helpers: minute-of-day arithmetic
//! for exclude windows and local timestamp rendering for notification bodies.

use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::time::Duration;

/// Parses a Go-style duration suffix (`s`, `m`, `h`); bare integers are
/// seconds. Unparseable or empty strings fall back to `default`.
pub fn parse_duration(raw: Option<&str>, default: Duration) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };

    let (digits, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(raw.len()));
    let Ok(value) = digits.parse::<f64>() else {
        return default;
    };

    let seconds = match unit {
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return default,
    };

    if seconds <= 0.0 || !seconds.is_finite() {
        return default;
    }
    Duration::from_secs_f64(seconds)
}

/// Check-interval floor is one minute; anything shorter or unparseable
/// defaults to one minute.
pub fn check_interval(raw: Option<&str>) -> Duration {
    let parsed = parse_duration(raw, Duration::from_secs(60));
    parsed.max(Duration::from_secs(60))
}

/// Minutes since local midnight for `instant` rendered in `tz`.
pub fn minute_of_day(instant: DateTime<Utc>, tz: Tz) -> u32 {
    let local = instant.with_timezone(&tz);
    local.hour() * 60 + local.minute()
}

/// Parses an `HH:MM` string into minutes since midnight. Malformed input
/// yields `None`, which callers should treat as "window never matches".
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// `true` if `minute` falls inside `[start, end)`, wrapping past midnight
/// when `start > end`.
pub fn minute_in_window(minute: u32, start: u32, end: u32) -> bool {
    if start <= end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}

pub fn format_local(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Builds a fixed timestamp for deterministic tests instead of `Utc::now()`.
#[cfg(test)]
pub fn ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration(Some("30s"), Duration::ZERO), Duration::from_secs(30));
        assert_eq!(parse_duration(Some("5m"), Duration::ZERO), Duration::from_secs(300));
        assert_eq!(parse_duration(Some("2h"), Duration::ZERO), Duration::from_secs(7200));
        assert_eq!(parse_duration(Some("90"), Duration::ZERO), Duration::from_secs(90));
    }

    #[test]
    fn falls_back_on_garbage() {
        assert_eq!(parse_duration(Some("banana"), Duration::from_secs(42)), Duration::from_secs(42));
        assert_eq!(parse_duration(None, Duration::from_secs(42)), Duration::from_secs(42));
    }

    #[test]
    fn check_interval_floors_at_one_minute() {
        assert_eq!(check_interval(Some("10s")), Duration::from_secs(60));
        assert_eq!(check_interval(Some("5m")), Duration::from_secs(300));
        assert_eq!(check_interval(Some("garbage")), Duration::from_secs(60));
    }

    #[test]
    fn window_same_day() {
        assert!(minute_in_window(600, 540, 660)); // 10:00 within 09:00-11:00
        assert!(!minute_in_window(700, 540, 660));
    }

    #[test]
    fn window_wraps_midnight() {
        // 23:00 - 01:00
        assert!(minute_in_window(23 * 60 + 30, 23 * 60, 60));
        assert!(minute_in_window(30, 23 * 60, 60));
        assert!(!minute_in_window(12 * 60, 23 * 60, 60));
    }

    #[test]
    fn hhmm_rejects_out_of_range() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("10:60"), None);
        assert_eq!(parse_hhmm("09:05"), Some(9 * 60 + 5));
    }
}
