use super::ChannelSender;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;

pub struct TelegramSender {
    http: reqwest::Client,
}

impl TelegramSender {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramConfig {
    token: String,
    chat_id: String,
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send(
        &self,
        config: &serde_json::Value,
        title: &str,
        body: &str,
        is_recovery: bool,
    ) -> anyhow::Result<()> {
        let cfg: TelegramConfig = serde_json::from_value(config.clone())
            .context("invalid telegram channel config")?;

        let icon = if is_recovery { "\u{2705}" } else { "\u{1f6a8}" };
        let text = format!("{icon} *{title}*\n{body}");

        let url = format!("https://api.telegram.org/bot{}/sendMessage", cfg.token);
        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "chat_id": cfg.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("telegram api returned status {}", resp.status());
        }
        Ok(())
    }
}
