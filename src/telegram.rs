use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::error::AlertError;

/// What happened to the notification. Delivery problems never abort a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DispatchOutcome {
    Delivered { delivered: bool, message_id: i64 },
    Skipped { skipped: bool, reason: String },
    Failed { delivered: bool, error: String },
}

impl DispatchOutcome {
    pub fn delivered(message_id: i64) -> Self {
        DispatchOutcome::Delivered {
            delivered: true,
            message_id,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        DispatchOutcome::Skipped {
            skipped: true,
            reason: reason.into(),
        }
    }

    pub fn failed(error: &AlertError) -> Self {
        DispatchOutcome::Failed {
            delivered: false,
            error: error.to_string(),
        }
    }

    #[cfg(test)]
    pub fn is_skipped(&self) -> bool {
        matches!(self, DispatchOutcome::Skipped { .. })
    }

    /// One-word status for logs and the run ledger.
    pub fn status(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Skipped { .. } => "skipped",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }
}

/// Sends the published image and its caption to a channel.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, image_url: &str, caption: &str) -> DispatchOutcome;
}

#[derive(Debug, Serialize)]
struct SendPhotoRequest<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

struct Credentials {
    bot_token: String,
    chat_id: String,
}

pub struct TelegramDispatcher {
    http: Client,
    api_base: String,
    credentials: Option<Credentials>,
}

impl TelegramDispatcher {
    /// Credentials are optional. Without both token and chat id every dispatch is skipped.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        let credentials = match (&config.bot_token, &config.chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(Credentials {
                bot_token: bot_token.clone(),
                chat_id: chat_id.clone(),
            }),
            _ => None,
        };
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn send_photo(&self, creds: &Credentials, image_url: &str, caption: &str) -> Result<i64> {
        let url = format!("{}/bot{}/sendPhoto", self.api_base, creds.bot_token);
        let body = SendPhotoRequest {
            chat_id: &creds.chat_id,
            photo: image_url,
            caption,
            parse_mode: "Markdown",
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            // The URL embeds the bot token, keep it out of the error text.
            .map_err(|e| anyhow!("Telegram request failed: {}", e.without_url()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Telegram API returned {}: {}", status, text);
        }
        let parsed: TelegramResponse =
            serde_json::from_str(&text).context("Failed to parse Telegram response")?;
        match (parsed.ok, parsed.result) {
            (true, Some(msg)) => Ok(msg.message_id),
            _ => bail!(
                "Telegram rejected message: {}",
                parsed.description.unwrap_or_else(|| "no description".into())
            ),
        }
    }
}

#[async_trait]
impl Dispatcher for TelegramDispatcher {
    async fn dispatch(&self, image_url: &str, caption: &str) -> DispatchOutcome {
        let creds = match &self.credentials {
            Some(c) => c,
            None => {
                debug!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not set, skipping alert");
                return DispatchOutcome::skipped("telegram credentials not configured");
            }
        };

        match self.send_photo(creds, image_url, caption).await {
            Ok(message_id) => {
                info!(message_id, "Telegram alert sent");
                DispatchOutcome::delivered(message_id)
            }
            Err(e) => {
                let err = AlertError::Dispatch(e);
                warn!(error = %err, "Telegram alert failed");
                DispatchOutcome::failed(&err)
            }
        }
    }
}
