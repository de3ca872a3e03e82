//! Telegram channel adapter.
//!
//! Provides the `TelegramChannel` implementation for receiving and sending messages
//! through the Telegram Bot API using long polling.

use crate::message::{ButtonPress, InboundEvent, IncomingMessage, InlineButton, Keyboard};
use crate::traits::{ChannelError, ChannelResult, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Maximum characters per outgoing message.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Extra time the HTTP client waits beyond the long-poll timeout.
const POLL_GRACE: Duration = Duration::from_secs(10);

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

// ============================================================================
// Telegram Channel
// ============================================================================

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    bot_username: Option<String>,
    stopping: AtomicBool,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 60,
            client: reqwest::Client::new(),
            bot_username: None,
            stopping: AtomicBool::new(false),
        }
    }

    /// Use a different Bot API host (self-hosted server or test double).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Long-poll timeout sent to getUpdates.
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Build from the relay configuration section.
    pub fn from_config(config: &relay_common::config::TelegramConfig) -> Self {
        Self::new(config.bot_token.clone())
            .with_api_base(config.api_base.clone())
            .with_poll_timeout(config.poll_timeout_secs)
    }

    /// Bot username reported by getMe, once initialized.
    pub fn bot_username(&self) -> Option<&str> {
        self.bot_username.as_deref()
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Call a Bot API method and return its `result` field.
    async fn call(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> ChannelResult<serde_json::Value> {
        let mut req = self.client.post(self.api_url(method)).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("{method}: {e}")))?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Connection(format!("{method}: invalid response: {e}")))?;

        let ok = data
            .get("ok")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if status.is_success() && ok {
            return Ok(data.get("result").cloned().unwrap_or(serde_json::Value::Null));
        }

        let description = data
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("no description")
            .to_string();

        match status.as_u16() {
            401 | 404 => Err(ChannelError::Auth(format!("{method}: {description}"))),
            429 => {
                let retry_after_secs = data
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(1);
                Err(ChannelError::RateLimited { retry_after_secs })
            }
            _ => Err(ChannelError::SendFailed(format!(
                "{method} failed ({status}): {description}"
            ))),
        }
    }

    /// Remove any webhook so getUpdates is allowed.
    pub async fn delete_webhook(&self) -> ChannelResult<()> {
        self.call(
            "deleteWebhook",
            &serde_json::json!({ "drop_pending_updates": false }),
            None,
        )
        .await?;
        tracing::info!("Telegram webhook removed");
        Ok(())
    }

    async fn get_me(&self) -> ChannelResult<serde_json::Value> {
        self.call("getMe", &serde_json::json!({}), None).await
    }

    async fn get_updates(&self, offset: i64) -> ChannelResult<Vec<serde_json::Value>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"]
        });
        let timeout = Duration::from_secs(self.poll_timeout_secs) + POLL_GRACE;
        let result = self.call("getUpdates", &body, Some(timeout)).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    async fn send_single_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> ChannelResult<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        self.call("sendMessage", &body, None).await?;
        Ok(())
    }
}

fn keyboard_markup(keyboard: Keyboard) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = keyboard
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|InlineButton { text, callback_data }| {
                    serde_json::json!({
                        "text": text,
                        "callback_data": callback_data
                    })
                })
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

/// Turn one getUpdates entry into an inbound event.
///
/// Updates other than text messages and button presses yield `None`.
pub fn parse_update(update: &serde_json::Value) -> Option<InboundEvent> {
    let update_id = update.get("update_id")?.as_i64()?;

    if let Some(cb) = update.get("callback_query") {
        return parse_callback_query(cb).map(InboundEvent::Button);
    }

    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?.to_string();
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let from = message.get("from")?;
    let user_id = from.get("id")?.as_i64()?;
    let username = from
        .get("username")
        .and_then(|u| u.as_str())
        .map(String::from);

    Some(InboundEvent::Message(IncomingMessage {
        update_id,
        chat_id,
        user_id,
        username,
        text,
    }))
}

fn parse_callback_query(callback: &serde_json::Value) -> Option<ButtonPress> {
    let callback_id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?.to_string();

    let from = callback.get("from")?;
    let user_id = from.get("id")?.as_i64()?;
    let username = from
        .get("username")
        .and_then(|u| u.as_str())
        .map(String::from);

    let chat_id = callback.get("message")?.get("chat")?.get("id")?.as_i64()?;

    Some(ButtonPress {
        callback_id,
        chat_id,
        user_id,
        username,
        data,
    })
}

/// Split a message into chunks of at most `max_chars` characters.
///
/// Prefers paragraph, line, sentence and word boundaries, in that order.
/// A `max_chars` of zero is treated as one.
pub fn split_message(message: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..limit];
        let split_pos = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(". ").map(|p| p + 1))
            .or_else(|| window.rfind(' '))
            .filter(|&p| p > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_pos].to_string());
        remaining = remaining[split_pos..].trim_start();
    }

    chunks
}

#[async_trait]
impl Transport for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        let me = self.get_me().await?;
        self.bot_username = me
            .get("username")
            .and_then(|u| u.as_str())
            .map(String::from);

        self.delete_webhook().await?;

        tracing::info!(
            bot = %self.bot_username.as_deref().unwrap_or("unknown"),
            "Telegram channel initialized"
        );
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> ChannelResult<()> {
        if text.is_empty() {
            return Err(ChannelError::InvalidMessage("empty text".into()));
        }
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.send_single_chunk(chat_id, &chunk, None).await?;
        }
        Ok(())
    }

    async fn send_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Keyboard,
    ) -> ChannelResult<()> {
        let mut chunks = split_message(text, MAX_MESSAGE_LEN);
        let Some(last) = chunks.pop() else {
            return Err(ChannelError::InvalidMessage("empty text".into()));
        };
        for chunk in chunks {
            self.send_single_chunk(chat_id, &chunk, None).await?;
        }
        // Keyboard rides on the final chunk.
        self.send_single_chunk(chat_id, &last, Some(keyboard_markup(keyboard)))
            .await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> ChannelResult<()> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(t) = text {
            body["text"] = serde_json::Value::String(t.to_string());
        }
        self.call("answerCallbackQuery", &body, None).await?;
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<InboundEvent>) -> ChannelResult<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for updates...");

        loop {
            if self.stopping.load(Ordering::SeqCst) || tx.is_closed() {
                tracing::info!("Telegram listener stopped");
                return Ok(());
            }

            let updates = match self.get_updates(offset).await {
                Ok(u) => u,
                Err(ChannelError::Auth(e)) => return Err(ChannelError::Auth(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll error");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in &updates {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    offset = offset.max(uid + 1);
                }

                let Some(event) = parse_update(update) else {
                    tracing::debug!("Telegram: skipping unsupported update");
                    continue;
                };

                tracing::debug!(
                    channel = "telegram",
                    kind = event.kind(),
                    user_id = event.user_id(),
                    chat_id = event.chat_id(),
                    "Telegram update received"
                );

                if tx.send(event).await.is_err() {
                    tracing::info!("Event receiver dropped, Telegram listener exiting");
                    return Ok(());
                }
            }
        }
    }

    async fn health_check(&self) -> ChannelResult<()> {
        self.get_me().await.map(|_| ()).map_err(|e| match e {
            ChannelError::Connection(_) => ChannelError::NotReady,
            other => other,
        })
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        tracing::info!("Telegram channel shutting down");
        self.stopping.store(true, Ordering::SeqCst);
        Ok(())
    }
}
