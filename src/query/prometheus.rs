use super::{parse_sample_value, QueryClient, QueryResult, SeriesSample};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub struct PrometheusClient {
    http: reqwest::Client,
}

impl PrometheusClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    data: PromData,
}

#[derive(Debug, Deserialize)]
struct PromData {
    result: Vec<PromSeries>,
}

#[derive(Debug, Deserialize)]
struct PromSeries {
    metric: std::collections::BTreeMap<String, String>,
    value: (f64, String),
}

#[async_trait]
impl QueryClient for PrometheusClient {
    async fn query(
        &self,
        base_url: &str,
        expression: &str,
        timeout: Duration,
    ) -> anyhow::Result<QueryResult> {
        let url = format!("{}/api/v1/query", base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(url)
            .query(&[("query", expression)])
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<PromResponse>()
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
