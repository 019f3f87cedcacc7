use anyhow::{bail, Context, Result};
use std::env;

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_required_string(key: &str) -> Result<String> {
    env_string(key).with_context(|| format!("missing required environment variable {key}"))
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        None => Ok(default),
    }
}

fn env_u16(key: &str, default: u16) -> Result<u16> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<u16>()
            .with_context(|| format!("{key} must be a 16-bit integer, got {raw:?}")),
        None => Ok(default),
    }
}

/// Process-wide configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct WatchgateConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub timezone: String,
    pub retention_days: u32,
    pub notify_queue_capacity: usize,
    pub notify_workers: usize,
    pub rule_reload_interval_seconds: u64,
    pub http_request_timeout_seconds: u64,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
}

impl WatchgateConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env_required_string("DATABASE_URL")?;
        let host = env_string("WATCHGATE_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = env_u16("WATCHGATE_PORT", 8088)?;
        let timezone = env_string("WATCHGATE_TIMEZONE").unwrap_or_else(|| "Asia/Shanghai".to_string());

        let retention_days = env_u64("WATCHGATE_RETENTION_DAYS", 90)? as u32;
        if !(1..=3650).contains(&retention_days) {
            bail!("WATCHGATE_RETENTION_DAYS must be between 1 and 3650, got {retention_days}");
        }

        let notify_queue_capacity = env_u64("WATCHGATE_NOTIFY_QUEUE_CAPACITY", 500)? as usize;
        let notify_workers = env_u64("WATCHGATE_NOTIFY_WORKERS", 8)? as usize;
        if notify_workers == 0 {
            bail!("WATCHGATE_NOTIFY_WORKERS must be at least 1");
        }

        let rule_reload_interval_seconds = env_u64("WATCHGATE_RULE_RELOAD_INTERVAL_SECONDS", 300)?;
        let http_request_timeout_seconds = env_u64("WATCHGATE_HTTP_REQUEST_TIMEOUT_SECONDS", 30)?;

        let rate_limit_rps = match env_string("WATCHGATE_RATE_LIMIT_RPS") {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("WATCHGATE_RATE_LIMIT_RPS must be a number, got {raw:?}"))?,
            None => 5.0,
        };
        let rate_limit_burst = env_u64("WATCHGATE_RATE_LIMIT_BURST", 3)? as u32;

        // tz database lookups happen lazily at render time; validate eagerly so
        // a typo'd timezone fails startup instead of every notification.
        if timezone.parse::<chrono_tz::Tz>().is_err() {
            bail!("WATCHGATE_TIMEZONE {timezone:?} is not a recognized IANA time zone");
        }

        Ok(Self {
            database_url,
            host,
            port,
            timezone,
            retention_days,
            notify_queue_capacity,
            notify_workers,
            rule_reload_interval_seconds,
            http_request_timeout_seconds,
            rate_limit_rps,
            rate_limit_burst,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Asia::Shanghai)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env<F: FnOnce() -> Result<WatchgateConfig>>(
        vars: &[(&str, &str)],
        f: F,
    ) -> Result<WatchgateConfig> {
        for (k, v) in vars {
            env::set_var(k, v);
        }
        let result = f();
        for (k, _) in vars {
            env::remove_var(k);
        }
        result
    }

    #[test]
    fn requires_database_url() {
        env::remove_var("DATABASE_URL");
        let err = WatchgateConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn applies_defaults() {
        let cfg = with_env(&[("DATABASE_URL", "postgres://localhost/watchgate")], || {
            WatchgateConfig::from_env()
        })
        .unwrap();
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.retention_days, 90);
        assert_eq!(cfg.notify_workers, 8);
        assert_eq!(cfg.timezone, "Asia/Shanghai");
    }

    #[test]
    fn rejects_out_of_range_retention() {
        let err = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/watchgate"),
                ("WATCHGATE_RETENTION_DAYS", "0"),
            ],
            WatchgateConfig::from_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("WATCHGATE_RETENTION_DAYS"));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/watchgate"),
                ("WATCHGATE_TIMEZONE", "Not/AZone"),
            ],
            WatchgateConfig::from_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("time zone"));
    }
}
