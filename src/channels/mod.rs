pub mod jira;
pub mod lark;
pub mod rate_limiter;
pub mod telegram;

use async_trait::async_trait;
use rate_limiter::TokenBucket;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        config: &serde_json::Value,
        title: &str,
        body: &str,
        is_recovery: bool,
    ) -> anyhow::Result<()>;
}

const MAX_ATTEMPTS: u32 = 3;

/// Uniform retry wrapper: up to three attempts, linear backoff (1x, 2x a
/// one-second base). One send record is written by the caller regardless
/// of how many attempts this took.
pub async fn send_with_retry(
    sender: &dyn ChannelSender,
    config: &serde_json::Value,
    title: &str,
    body: &str,
    is_recovery: bool,
) -> anyhow::Result<()> {
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match sender.send(config, title, body, is_recovery).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "channel send attempt failed");
                last_err = Some(err);
                if attempt < MAX_ATTEMPTS {
                    sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}

/// Wraps a sender with a shared token bucket, used for channel types (Lark
/// webhooks) that are prone to throttling the process if hammered.
pub struct RateLimitedSender<S: ChannelSender> {
    inner: S,
    bucket: Arc<TokenBucket>,
}

impl<S: ChannelSender> RateLimitedSender<S> {
    pub fn new(inner: S, rate_per_sec: f64, burst: u32) -> Self {
        Self {
            inner,
            bucket: Arc::new(TokenBucket::new(rate_per_sec, burst)),
        }
    }
}

#[async_trait]
impl<S: ChannelSender> ChannelSender for RateLimitedSender<S> {
    async fn send(
        &self,
        config: &serde_json::Value,
        title: &str,
        body: &str,
        is_recovery: bool,
    ) -> anyhow::Result<()> {
        self.bucket.acquire().await;
        self.inner.send(config, title, body, is_recovery).await
    }
}

/// Builds every channel sender once, keyed by channel type. Built once and
/// held on `notify::Inner` so the Lark token bucket's state spans dispatches
/// instead of resetting to a fresh `burst`-sized bucket on every send.
pub fn build_senders(http: reqwest::Client, rate_rps: f64, rate_burst: u32) -> HashMap<String, Arc<dyn ChannelSender>> {
    let mut senders: HashMap<String, Arc<dyn ChannelSender>> = HashMap::new();
    senders.insert("telegram".to_string(), Arc::new(telegram::TelegramSender::new(http.clone())));
    senders.insert(
        "lark".to_string(),
        Arc::new(RateLimitedSender::new(lark::LarkSender::new(http), rate_rps, rate_burst)),
    );
    senders
}
