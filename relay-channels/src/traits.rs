//! Transport trait implemented by chat platform adapters.

use crate::message::{InboundEvent, Keyboard};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel not ready")]
    NotReady,
}

impl From<ChannelError> for relay_common::Error {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Auth(msg) => Self::Config(format!("transport rejected credentials: {msg}")),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Chat transport.
///
/// One instance is shared by the listener task and every event handler.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name.
    fn name(&self) -> &'static str;

    /// Verify credentials and prepare for polling.
    async fn init(&mut self) -> ChannelResult<()>;

    /// Send plain text, split into several messages when it exceeds the platform limit.
    async fn send_text(&self, chat_id: i64, text: &str) -> ChannelResult<()>;

    /// Send text with an inline keyboard attached.
    async fn send_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Keyboard,
    ) -> ChannelResult<()>;

    /// Acknowledge a button press, optionally with a toast text.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> ChannelResult<()>;

    /// Poll for events and push them into `tx` until `tx` closes or
    /// [`Transport::shutdown`] is called.
    ///
    /// A full channel suspends polling.
    async fn listen(&self, tx: mpsc::Sender<InboundEvent>) -> ChannelResult<()>;

    /// Check if the transport is healthy.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Stop listening.
    async fn shutdown(&self) -> ChannelResult<()>;
}
