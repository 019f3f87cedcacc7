use super::ChannelSender;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;

pub struct LarkSender {
    http: reqwest::Client,
}

impl LarkSender {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LarkConfig {
    Object { webhook_url: String },
    Bare(String),
}

impl LarkConfig {
    fn webhook_url(&self) -> &str {
        match self {
            Self::Object { webhook_url } => webhook_url,
            Self::Bare(url) => url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LarkAck {
    #[serde(default)]
    code: i64,
}

#[async_trait]
impl ChannelSender for LarkSender {
    async fn send(
        &self,
        config: &serde_json::Value,
        title: &str,
        body: &str,
        is_recovery: bool,
    ) -> anyhow::Result<()> {
        let cfg: LarkConfig =
            serde_json::from_value(config.clone()).context("invalid lark channel config")?;
        let webhook_url = url::Url::parse(cfg.webhook_url())
            .with_context(|| format!("invalid lark webhook_url {:?}", cfg.webhook_url()))?;

        let color = if is_recovery { "green" } else { "red" };
        let header_title = if is_recovery {
            format!("\u{2705} {title}")
        } else {
            format!("\u{1f6a8} {title}")
        };

        let payload = serde_json::json!({
            "msg_type": "interactive",
            "card": {
                "header": { "title": { "tag": "plain_text", "content": header_title }, "template": color },
                "elements": [
                    { "tag": "div", "text": { "tag": "lark_md", "content": body } }
                ]
            }
        });

        let resp = self
            .http
            .post(webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("lark webhook returned status {}", resp.status());
        }

        let ack: LarkAck = resp.json().await.unwrap_or(LarkAck { code: 0 });
        if ack.code != 0 {
            bail!("lark webhook reported failure code {}", ack.code);
        }
        Ok(())
    }
}
