use super::{parse_sample_value, QueryClient, QueryResult, SeriesSample};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// VictoriaMetrics speaks the Prometheus HTTP API for instant queries; the
/// response envelope is byte-compatible, so only the endpoint path differs.
pub struct VictoriaMetricsClient {
    http: reqwest::Client,
}

impl VictoriaMetricsClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct VmResponse {
    data: VmData,
}

#[derive(Debug, Deserialize)]
struct VmData {
    result: Vec<VmSeries>,
}

#[derive(Debug, Deserialize)]
struct VmSeries {
    metric: std::collections::BTreeMap<String, String>,
    value: (f64, String),
}

#[async_trait]
impl QueryClient for VictoriaMetricsClient {
    async fn query(
        &self,
        base_url: &str,
        expression: &str,
        timeout: Duration,
    ) -> anyhow::Result<QueryResult> {
        let url = format!(
            "{}/api/v1/query",
            base_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .get(url)
            .query(&[("query", expression)])
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<VmResponse>()
            .await?;

        let series = resp
            .data
            .result
            .into_iter()
            .map(|s| SeriesSample {
                labels: s.metric,
                value: parse_sample_value(&s.value.1),
            })
            .collect();

        Ok(QueryResult { series })
    }
}
