//! Telegram Bot API notifier.

use super::Notifier;
use crate::config::TelegramConfig;
use crate::utils::errors::{KeeperError, Result};
use async_trait::async_trait;
use serde::Deserialize;

pub struct TelegramNotifier {
    config: TelegramConfig,
    http: reqwest::Client,
    host: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, http: reqwest::Client) -> Self {
        let host = hostname::get()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown-host".to_string());
        Self { config, http, host }
    }

    fn text(&self, message: &str) -> String {
        format!("[{}] {}", self.host, message)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.token
        );
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "chat_id": self.config.chat_id,
                "text": self.text(message),
            }))
            .send()
            .await
            .map_err(|e| KeeperError::Notification(format!("Telegram unreachable: {}", e.without_url())))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| KeeperError::Notification(format!("HTTP {}: {}", status.as_u16(), e.without_url())))?;
        if !body.ok {
            return Err(KeeperError::Notification(
                body.description.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ));
        }
        Ok(())
    }
}
