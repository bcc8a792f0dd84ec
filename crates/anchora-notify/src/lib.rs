//! # Anchora Notify
//!
//! Best-effort fan-out of backup outcomes to a chat channel.
//!
//! Delivery is never load-bearing: every transport error is logged and
//! swallowed, and a failed notification never fails the execution that
//! produced it.

#![warn(clippy::all)]

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

/// Telegram delivery bound.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel coordinates taken from the organization record.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl ChannelConfig {
    /// Assemble a channel from optional organization fields; both must be
    /// present for the channel to exist.
    pub fn from_parts(bot_token: Option<String>, chat_id: Option<String>) -> Option<Self> {
        match (bot_token, chat_id) {
            (Some(bot_token), Some(chat_id))
                if !bot_token.is_empty() && !chat_id.is_empty() =>
            {
                Some(Self { bot_token, chat_id })
            }
            _ => None,
        }
    }
}

/// Outcome sink. Implementations must be best-effort.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a short outcome message; errors are logged, never raised.
    async fn notify(&self, channel: &ChannelConfig, text: &str);
}

/// Telegram Bot API sink.
#[derive(Default)]
pub struct TelegramSink {
    http: reqwest::Client,
}

impl TelegramSink {
    /// Create a sink with its own HTTP client.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn notify(&self, channel: &ChannelConfig, text: &str) {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            channel.bot_token
        );
        let result = self
            .http
            .post(&url)
            .timeout(NOTIFY_TIMEOUT)
            .json(&json!({ "chat_id": channel.chat_id, "text": text }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(chat_id = %channel.chat_id, "notification delivered");
            }
            Ok(response) => {
                warn!(chat_id = %channel.chat_id, status = %response.status(), "notification rejected");
            }
            Err(err) => {
                warn!(chat_id = %channel.chat_id, error = %err, "notification failed");
            }
        }
    }
}

/// Sink that drops everything; used in tests and for organizations without
/// a configured channel.
#[derive(Default)]
pub struct NullSink;

impl NullSink {
    /// Create the no-op sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _channel: &ChannelConfig, text: &str) {
        debug!(text = %text, "notification dropped (null sink)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_requires_both_parts() {
        assert!(ChannelConfig::from_parts(Some("bot".into()), Some("chat".into())).is_some());
        assert!(ChannelConfig::from_parts(Some("bot".into()), None).is_none());
        assert!(ChannelConfig::from_parts(None, Some("chat".into())).is_none());
        assert!(ChannelConfig::from_parts(Some("".into()), Some("chat".into())).is_none());
    }

    #[tokio::test]
    async fn test_null_sink_swallows() {
        let sink = NullSink::new();
        let channel = ChannelConfig {
            bot_token: "bot".into(),
            chat_id: "chat".into(),
        };
        sink.notify(&channel, "backup finished").await;
    }
}
