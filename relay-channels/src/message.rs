//! Message types exchanged with chat transports.

use serde::{Deserialize, Serialize};

/// A text message sent by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Platform update id, monotonically increasing per bot.
    pub update_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub text: String,
}

/// An inline keyboard button press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPress {
    /// Id used to acknowledge the press.
    pub callback_id: String,
    pub chat_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    /// The button's callback data.
    pub data: String,
}

/// Inbound event delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Message(IncomingMessage),
    Button(ButtonPress),
}

impl InboundEvent {
    /// Sender's user id.
    pub const fn user_id(&self) -> i64 {
        match self {
            Self::Message(m) => m.user_id,
            Self::Button(b) => b.user_id,
        }
    }

    /// Chat the event came from, where replies go.
    pub const fn chat_id(&self) -> i64 {
        match self {
            Self::Message(m) => m.chat_id,
            Self::Button(b) => b.chat_id,
        }
    }

    /// Event kind for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Button(_) => "button",
        }
    }
}

/// A single inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<InlineButton>>;
