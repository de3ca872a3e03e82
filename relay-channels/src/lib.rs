//! Relay Channels - Chat transport adapters for the relay bot.
//!
//! ## Architecture
//!
//! A transport long-polls its platform, turns updates into [`InboundEvent`]s
//! and pushes them into a bounded channel consumed by the dispatcher. Replies
//! go back through the same [`Transport`] handle.
//!
//! ```text
//! Telegram → getUpdates → TelegramChannel::listen → mpsc → Dispatcher
//!                                                              ↓
//! User ←── sendMessage / answerCallbackQuery ←────────── Relay handler
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod message;
pub mod telegram;
pub mod traits;

// Re-export commonly used types
pub use message::{ButtonPress, InboundEvent, IncomingMessage, InlineButton, Keyboard};
pub use telegram::TelegramChannel;
pub use traits::{ChannelError, ChannelResult, Transport};
