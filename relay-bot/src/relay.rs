//! Event routing and the conversation pipeline.
//!
//! Every inbound event passes the rate limiter first. Slash commands go to the
//! command router; anything else is a conversation turn:
//!
//! ```text
//! check_valid -> get_preset -> get_history -> build_prompt -> evict_oldest
//!   -> complete -> send reply -> append_exchange
//! ```
//!
//! Failures end the event with a reply chosen by [`ErrorCategory`]. The history
//! is only appended after the reply was delivered.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use relay_channels::{ButtonPress, InboundEvent, IncomingMessage, Transport};
use relay_common::logging::truncate_for_log;
use relay_common::{Config, Error, ErrorCategory, KvStore, Result};

use crate::allowlist::{extend_expiry, AllowList, AllowListEntry};
use crate::auth::AuthorizationGate;
use crate::commands::{AdminAction, AdminKind, Command, ADMIN_USAGE};
use crate::completion::CompletionClient;
use crate::dispatcher::EventHandler;
use crate::presets::PresetCatalog;
use crate::rate_limit::RateLimiter;
use crate::session::{build_prompt, SessionStore, StoredHistory};

pub const WELCOME_TEXT: &str = "Welcome! Send me a message to start chatting, or pick a persona below.";
pub const HELP_TEXT: &str = "Send any text to chat with the assistant.\n\n\
/start - show the persona keyboard\n\
/clear - forget the conversation and persona\n\
/expiry - show when your access expires\n\
/id - show your user ID\n\
/help - show this message\n\
/about - about this bot";
pub const ABOUT_TEXT: &str =
    "A relay to an AI assistant. Conversations are kept for 30 minutes of inactivity.";
pub const CLEARED_TEXT: &str = "Conversation and persona cleared. Pick a persona to start again.";
pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command. Send /help to see what I can do.";
pub const NOT_AUTHORIZED_TEXT: &str =
    "Your access has expired or you are not authorized. Contact an admin.";
pub const ADMIN_ONLY_TEXT: &str = "This command is for admins only.";
pub const TOO_FAST_TEXT: &str = "You are sending messages too fast. Please wait a moment.";
pub const RETRY_LATER_TEXT: &str = "Failed to get a response, please try again later.";

const LOG_PREVIEW_CHARS: usize = 200;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Routes events and runs the conversation pipeline.
pub struct Relay {
    transport: Arc<dyn Transport>,
    sessions: SessionStore,
    allow_list: Arc<dyn AllowList>,
    gate: AuthorizationGate,
    limiter: RateLimiter,
    completion: Arc<dyn CompletionClient>,
    presets: PresetCatalog,
}

impl Relay {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        kv: Arc<dyn KvStore>,
        allow_list: Arc<dyn AllowList>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            transport,
            sessions: SessionStore::new(kv.clone(), config.session.clone()),
            gate: AuthorizationGate::new(allow_list.clone()),
            allow_list,
            limiter: RateLimiter::from_config(kv, &config.rate_limit),
            completion,
            presets: PresetCatalog::new(config.presets.clone()),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one inbound event.
    ///
    /// Returns `Err` only for dependency failures, after the user was told to
    /// retry. Refusals and bad input are answered and return `Ok`.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Message(msg) => {
                let chat_id = msg.chat_id;
                let outcome = self.on_message(msg).await;
                self.finish(chat_id, outcome).await
            }
            InboundEvent::Button(press) => {
                let outcome = self.on_button(&press).await;
                let result = self.finish(press.chat_id, outcome).await;
                if let Err(e) = self.transport.answer_callback(&press.callback_id, None).await {
                    tracing::warn!(error = %e, "Failed to acknowledge button press");
                }
                result
            }
        }
    }

    async fn on_message(&self, msg: IncomingMessage) -> Result<()> {
        self.admit(msg.user_id).await?;

        match Command::parse(&msg.text, &self.presets) {
            Some(command) => self.run_command(msg.user_id, msg.chat_id, command).await,
            None => self.converse(&msg).await,
        }
    }

    async fn on_button(&self, press: &ButtonPress) -> Result<()> {
        self.admit(press.user_id).await?;
        self.require_valid(press.user_id).await?;

        match Command::parse(&press.data, &self.presets) {
            Some(command @ (Command::Help | Command::About | Command::Preset(_))) => {
                self.run_command(press.user_id, press.chat_id, command).await
            }
            _ => {
                tracing::debug!(data = %press.data, "Ignoring unknown button data");
                Ok(())
            }
        }
    }

    async fn admit(&self, user_id: i64) -> Result<()> {
        if self.limiter.admit(user_id).await {
            Ok(())
        } else {
            Err(Error::RateLimited(TOO_FAST_TEXT.to_string()))
        }
    }

    async fn require_valid(&self, user_id: i64) -> Result<()> {
        if self.gate.check_valid(user_id).await? {
            Ok(())
        } else {
            Err(Error::Forbidden(NOT_AUTHORIZED_TEXT.to_string()))
        }
    }

    // ========================================================================
    // Conversation
    // ========================================================================

    async fn converse(&self, msg: &IncomingMessage) -> Result<()> {
        let user_id = msg.user_id;
        self.require_valid(user_id).await?;

        tracing::info!(
            user_id,
            username = msg.username.as_deref().unwrap_or(""),
            text = %truncate_for_log(&msg.text, LOG_PREVIEW_CHARS),
            "User message"
        );

        let system = self.sessions.get_preset(user_id).await;
        let mut history = self.sessions.load_history(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(user_id, error = %e, "Failed to read history, starting fresh");
            StoredHistory::default()
        });

        let entries = std::mem::take(&mut history.entries);
        let window = build_prompt(&system, entries, &msg.text, self.sessions.max_context_chars());
        if window.evicted > 0 {
            tracing::debug!(user_id, evicted = window.evicted, "Trimmed history to fit budget");
            let raw_count = history.raw_prefix(window.evicted);
            if let Err(e) = self.sessions.evict_oldest(user_id, raw_count).await {
                tracing::warn!(user_id, error = %e, "Failed to evict old history");
            }
        }

        let reply = self.completion.complete(&window.messages).await?;

        self.transport.send_text(msg.chat_id, &reply).await?;
        tracing::info!(
            user_id,
            text = %truncate_for_log(&reply, LOG_PREVIEW_CHARS),
            "Assistant reply"
        );

        if let Err(e) = self.sessions.append_exchange(user_id, &msg.text, &reply).await {
            tracing::warn!(user_id, error = %e, "Failed to save exchange");
        }
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn run_command(&self, user_id: i64, chat_id: i64, command: Command) -> Result<()> {
        tracing::debug!(user_id, command = command.name(), "Command");

        match command {
            Command::Start => {
                self.transport
                    .send_with_buttons(chat_id, WELCOME_TEXT, self.presets.keyboard())
                    .await?;
            }
            Command::Help => self.transport.send_text(chat_id, HELP_TEXT).await?,
            Command::About => self.transport.send_text(chat_id, ABOUT_TEXT).await?,
            Command::Clear => {
                self.sessions.clear_all(user_id).await?;
                tracing::info!(user_id, "Session cleared");
                self.transport
                    .send_with_buttons(chat_id, CLEARED_TEXT, self.presets.keyboard())
                    .await?;
            }
            Command::Expiry => {
                let text = self.describe_own_expiry(user_id, Utc::now()).await?;
                self.transport.send_text(chat_id, &text).await?;
            }
            Command::Id => {
                self.transport
                    .send_text(chat_id, &format!("Your user ID: {user_id}"))
                    .await?;
            }
            Command::Admin { kind, args } => {
                let text = self.run_admin(user_id, kind, &args).await?;
                self.transport.send_text(chat_id, &text).await?;
            }
            Command::Preset(preset) => {
                self.require_valid(user_id).await?;
                self.sessions
                    .set_preset(user_id, &preset.button, &preset.content)
                    .await?;
                self.transport
                    .send_text(chat_id, &format!("Switched to {}", preset.button))
                    .await?;
            }
            Command::Unknown(name) => {
                tracing::debug!(user_id, command = %name, "Unknown command");
                self.transport.send_text(chat_id, UNKNOWN_COMMAND_TEXT).await?;
            }
        }
        Ok(())
    }

    async fn describe_own_expiry(&self, user_id: i64, now: DateTime<Utc>) -> Result<String> {
        let text = match self.allow_list.find(user_id).await? {
            None => "You are not on the allow-list.".to_string(),
            Some(entry) if entry.is_admin => "You are an admin. Your access is permanent.".to_string(),
            Some(entry) => match entry.remaining_at(now) {
                None => format!(
                    "Your access expired on {}.",
                    entry.expires_at.format(TIME_FORMAT)
                ),
                Some(left) => format!(
                    "Your access expires in {} ({}).",
                    format_remaining(left),
                    entry.expires_at.format(TIME_FORMAT)
                ),
            },
        };
        Ok(text)
    }

    async fn run_admin(&self, caller: i64, kind: AdminKind, args: &[String]) -> Result<String> {
        if !self.gate.check_admin(caller).await? {
            return Err(Error::Forbidden(ADMIN_ONLY_TEXT.to_string()));
        }
        let action = AdminAction::parse(kind, args)?;
        let now = Utc::now();

        let text = match action {
            AdminAction::AddUser { user_id, days } => {
                let entry = AllowListEntry::member(user_id, days, now);
                if self.allow_list.insert(&entry).await? {
                    tracing::info!(admin = caller, user_id, days, "Allow-list user added");
                    format!(
                        "User {user_id} added until {}.",
                        entry.expires_at.format(TIME_FORMAT)
                    )
                } else {
                    format!("User {user_id} is already on the allow-list. Use /extend instead.")
                }
            }
            AdminAction::DeleteUser { user_id } => {
                if self.allow_list.delete_non_admin(user_id).await? {
                    tracing::info!(admin = caller, user_id, "Allow-list user deleted");
                    format!("User {user_id} deleted.")
                } else {
                    format!("User {user_id} not found or is an admin.")
                }
            }
            AdminAction::Extend { user_id, days } => {
                match extend_expiry(self.allow_list.as_ref(), user_id, days, now).await? {
                    Some(expires_at) => {
                        tracing::info!(admin = caller, user_id, days, "Allow-list user extended");
                        format!(
                            "User {user_id} extended until {}.",
                            expires_at.format(TIME_FORMAT)
                        )
                    }
                    None => format!("User {user_id} not found or is an admin."),
                }
            }
            AdminAction::CheckUser { user_id: Some(user_id) } => {
                match self.allow_list.find(user_id).await? {
                    Some(entry) => format!(
                        "User {user_id}\nAdmin: {}\nExpires: {}\nStatus: {}",
                        if entry.is_admin { "yes" } else { "no" },
                        entry.expires_at.format(TIME_FORMAT),
                        describe_status(&entry, now)
                    ),
                    None => format!("User {user_id} not found."),
                }
            }
            AdminAction::CheckUser { user_id: None } => {
                let entries = self.allow_list.list_all().await?;
                let mut text = if entries.is_empty() {
                    "The allow-list is empty.".to_string()
                } else {
                    let mut lines = vec![format!("Allow-list ({} users):", entries.len())];
                    lines.extend(
                        entries
                            .iter()
                            .map(|e| format!("{}: {}", e.user_id, describe_status(e, now))),
                    );
                    lines.join("\n")
                };
                text.push_str("\n\n");
                text.push_str(ADMIN_USAGE);
                text
            }
        };
        Ok(text)
    }

    // ========================================================================
    // Replies
    // ========================================================================

    /// Turn a pipeline outcome into a user reply.
    async fn finish(&self, chat_id: i64, outcome: Result<()>) -> Result<()> {
        let Err(err) = outcome else {
            return Ok(());
        };

        match err.category() {
            ErrorCategory::AdmissionDenied | ErrorCategory::MalformedInput => {
                tracing::debug!(reason = %err, "Event refused");
                self.reply(chat_id, user_message(&err)).await;
                Ok(())
            }
            ErrorCategory::Transient | ErrorCategory::Fatal => {
                if !is_transport_failure(&err) {
                    self.reply(chat_id, RETRY_LATER_TEXT).await;
                }
                Err(err)
            }
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.transport.send_text(chat_id, text).await {
            tracing::warn!(chat_id, error = %e, "Failed to send reply");
        }
    }
}

#[async_trait]
impl EventHandler for Relay {
    async fn handle(&self, event: InboundEvent) -> anyhow::Result<()> {
        Ok(self.handle_event(event).await?)
    }
}

/// Text shown to the user for a refusal or bad input.
fn user_message(err: &Error) -> &str {
    match err {
        Error::Forbidden(text) | Error::RateLimited(text) | Error::InvalidInput(text) => text,
        Error::WithContext { source, .. } => user_message(source),
        _ => RETRY_LATER_TEXT,
    }
}

fn is_transport_failure(err: &Error) -> bool {
    match err {
        Error::Transport(_) => true,
        Error::WithContext { source, .. } => is_transport_failure(source),
        _ => false,
    }
}

fn describe_status(entry: &AllowListEntry, now: DateTime<Utc>) -> String {
    if entry.is_admin {
        return "admin".to_string();
    }
    match entry.remaining_at(now) {
        Some(left) => format!("{} left", format_remaining(left)),
        None => "expired".to_string(),
    }
}

fn format_remaining(left: Duration) -> String {
    let days = left.num_days();
    let hours = (left - Duration::days(days)).num_hours();
    format!("{days} days {hours} hours")
}
