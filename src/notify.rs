//! Operator notifications
//!
//! Hard failures and unsigned transactions are pushed to the operator.
//! Telegram is used when configured, the log otherwise.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::error::{Error, Result};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Pick the notifier matching the configuration
pub fn from_config(config: &TelegramConfig) -> Result<Arc<dyn Notifier>> {
    if config.is_configured() {
        Ok(Arc::new(TelegramNotifier::new(
            config.token.clone(),
            config.chat_id.clone(),
        )?))
    } else {
        Ok(Arc::new(LogNotifier))
    }
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        info!("[notify] {}", message);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram bot `sendMessage` client
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: TELEGRAM_API_URL.to_string(),
            token,
            chat_id,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }

    /// Single delivery attempt
    async fn send_once(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&[("chat_id", self.chat_id.as_str()), ("text", message)])
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Telegram request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::Notification(format!("Telegram API error {}", status)));
        }

        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse Telegram response: {}", e)))?;

        if !body.ok {
            return Err(Error::Config(format!(
                "Telegram refused message: {}",
                body.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.send_once(message).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!("Retryable Telegram error: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    error!("Permanent Telegram error: {}", e);
                    Err(backoff::Error::permanent(e))
                }
            }
        })
        .await?;

        debug!("Notification delivered to chat {}", self.chat_id);
        Ok(())
    }
}
