//! Slash command parsing.
//!
//! Only the first whitespace-separated token selects the command. A trailing
//! `@botname` (as Telegram appends in group chats) is ignored.

use relay_common::{Error, PresetItem, Result};

use crate::presets::PresetCatalog;

/// Reserved command prefix.
pub const COMMAND_PREFIX: char = '/';

/// Usage text for admin commands.
pub const ADMIN_USAGE: &str = "Usage:\n/adduser <id> [days]\n/deleteuser <id>\n/extend <id> <days>\n/checkuser [id]";

/// Admin sub-command before argument validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminKind {
    AddUser,
    DeleteUser,
    Extend,
    CheckUser,
}

/// Every command the relay understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    About,
    Clear,
    Expiry,
    Id,
    Admin { kind: AdminKind, args: Vec<String> },
    Preset(PresetItem),
    Unknown(String),
}

impl Command {
    /// Resolve `text` to a command. `None` when it does not start with `/`.
    pub fn parse(text: &str, presets: &PresetCatalog) -> Option<Self> {
        let text = text.trim_start();
        if !text.starts_with(COMMAND_PREFIX) {
            return None;
        }

        let mut tokens = text.split_whitespace();
        let head = tokens.next().unwrap_or_default();
        let name = head.split_once('@').map_or(head, |(name, _)| name);
        let args = || tokens.map(str::to_string).collect::<Vec<_>>();

        let command = match name {
            "/start" => Self::Start,
            "/help" => Self::Help,
            "/about" => Self::About,
            "/clear" => Self::Clear,
            "/expiry" => Self::Expiry,
            "/id" => Self::Id,
            "/adduser" => Self::admin(AdminKind::AddUser, args()),
            "/deleteuser" => Self::admin(AdminKind::DeleteUser, args()),
            "/extend" => Self::admin(AdminKind::Extend, args()),
            "/checkuser" => Self::admin(AdminKind::CheckUser, args()),
            other => match presets.find(other) {
                Some(preset) => Self::Preset(preset.clone()),
                None => Self::Unknown(other.to_string()),
            },
        };
        Some(command)
    }

    fn admin(kind: AdminKind, args: Vec<String>) -> Self {
        Self::Admin { kind, args }
    }

    /// Short name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::About => "about",
            Self::Clear => "clear",
            Self::Expiry => "expiry",
            Self::Id => "id",
            Self::Admin { kind, .. } => match kind {
                AdminKind::AddUser => "adduser",
                AdminKind::DeleteUser => "deleteuser",
                AdminKind::Extend => "extend",
                AdminKind::CheckUser => "checkuser",
            },
            Self::Preset(_) => "preset",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Validated admin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    AddUser { user_id: i64, days: i64 },
    DeleteUser { user_id: i64 },
    Extend { user_id: i64, days: i64 },
    CheckUser { user_id: Option<i64> },
}

impl AdminAction {
    /// Validate arguments. Errors carry the text to show the caller.
    pub fn parse(kind: AdminKind, args: &[String]) -> Result<Self> {
        let action = match (kind, args) {
            (AdminKind::AddUser, [id]) => Self::AddUser {
                user_id: parse_user_id(id)?,
                days: 1,
            },
            (AdminKind::AddUser, [id, days]) => Self::AddUser {
                user_id: parse_user_id(id)?,
                days: parse_days(days)?,
            },
            (AdminKind::DeleteUser, [id]) => Self::DeleteUser {
                user_id: parse_user_id(id)?,
            },
            (AdminKind::Extend, [id, days]) => Self::Extend {
                user_id: parse_user_id(id)?,
                days: parse_days(days)?,
            },
            (AdminKind::CheckUser, []) => Self::CheckUser { user_id: None },
            (AdminKind::CheckUser, [id]) => Self::CheckUser {
                user_id: Some(parse_user_id(id)?),
            },
            _ => return Err(Error::InvalidInput(ADMIN_USAGE.to_string())),
        };
        Ok(action)
    }
}

fn parse_user_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| Error::InvalidInput("Invalid user ID format".to_string()))
}

fn parse_days(raw: &str) -> Result<i64> {
    match raw.parse::<i64>() {
        Ok(days) if days > 0 => Ok(days),
        _ => Err(Error::InvalidInput(
            "Days must be a positive whole number".to_string(),
        )),
    }
}
