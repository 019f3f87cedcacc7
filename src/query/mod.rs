//! Query clients: pull numeric samples from a time-series backend, behind a
//! trait so the scheduler can dispatch on datasource type.

pub mod prometheus;
pub mod victoriametrics;

use crate::models::Labels;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SeriesSample {
    pub labels: Labels,
    pub value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub series: Vec<SeriesSample>,
}

#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query(
        &self,
        base_url: &str,
        expression: &str,
        timeout: Duration,
    ) -> anyhow::Result<QueryResult>;
}

/// Parses the string half of a `(timestamp, value)` pair as returned by
/// Prometheus-flavored APIs. Unparseable values are treated as zero rather
/// than aborting the whole evaluation.
pub fn parse_sample_value(raw: &str) -> f64 {
    raw.parse::<f64>().unwrap_or(0.0)
}

pub fn client_for(source_type: &str, http: reqwest::Client) -> Option<Box<dyn QueryClient>> {
    match source_type {
        "prometheus" => Some(Box::new(prometheus::PrometheusClient::new(http))),
        "victoriametrics" => Some(Box::new(victoriametrics::VictoriaMetricsClient::new(http))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sample_value_falls_back_to_zero() {
        assert_eq!(parse_sample_value("3.5"), 3.5);
        assert_eq!(parse_sample_value("NaN-ish-garbage"), 0.0);
    }

    #[test]
    fn client_for_unknown_type_is_none() {
        let http = reqwest::Client::new();
        assert!(client_for("elasticsearch", http.clone()).is_none());
        assert!(client_for("doris", http).is_none());
    }
}
