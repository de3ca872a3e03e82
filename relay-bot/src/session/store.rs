//! Per-user preset and conversation history in the shared KV store.
//!
//! Keys:
//! - `user:{id}:preset` holds a JSON [`Preset`] with the preset TTL.
//! - `user:{id}:context` is a list of JSON [`HistoryEntry`] values, oldest
//!   first, with a sliding TTL refreshed on every append.
//!
//! Multi-step sequences (set preset then clear history, trim then append) are
//! separate store calls. Concurrent events from one user can interleave
//! between them.

use std::sync::Arc;

use relay_common::config::SessionConfig;
use relay_common::{KvStore, Result};

use super::types::{ChatMessage, HistoryEntry, Preset};

fn preset_key(user_id: i64) -> String {
    format!("user:{user_id}:preset")
}

fn history_key(user_id: i64) -> String {
    format!("user:{user_id}:context")
}

/// Decoded history plus where each entry sits in the stored list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredHistory {
    /// Decodable entries, oldest first.
    pub entries: Vec<HistoryEntry>,
    /// Raw list index of each entry in `entries`.
    positions: Vec<usize>,
    raw_len: usize,
}

impl StoredHistory {
    /// Raw list elements to trim so that exactly the first `evicted` decoded
    /// entries are gone. Undecodable elements in front of the first kept
    /// entry go with them.
    pub fn raw_prefix(&self, evicted: usize) -> usize {
        match evicted {
            0 => 0,
            n => self.positions.get(n).copied().unwrap_or(self.raw_len),
        }
    }
}

/// Session state for every user.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>, config: SessionConfig) -> Self {
        Self { kv, config }
    }

    /// Instruction used when a user has no preset.
    pub fn default_system_prompt(&self) -> &str {
        &self.config.default_system_prompt
    }

    /// Prompt budget in characters.
    pub fn max_context_chars(&self) -> usize {
        self.config.max_context_chars
    }

    /// The stored preset, if any.
    pub async fn current_preset(&self, user_id: i64) -> Result<Option<Preset>> {
        let Some(raw) = self.kv.get(&preset_key(user_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// System instruction for the next turn.
    ///
    /// Falls back to the default instruction when no preset is set or the
    /// store cannot be read.
    pub async fn get_preset(&self, user_id: i64) -> String {
        match self.current_preset(user_id).await {
            Ok(Some(preset)) => preset.content,
            Ok(None) => self.config.default_system_prompt.clone(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to read preset, using default");
                self.config.default_system_prompt.clone()
            }
        }
    }

    /// Switch persona. Always clears the user's history.
    ///
    /// A failure to clear history is logged and does not fail the switch.
    pub async fn set_preset(&self, user_id: i64, label: &str, content: &str) -> Result<()> {
        let preset = Preset {
            label: label.to_string(),
            content: content.to_string(),
        };
        let raw = serde_json::to_string(&preset)?;
        self.kv
            .set_ex(&preset_key(user_id), &raw, self.config.preset_ttl())
            .await?;

        if let Err(e) = self.kv.del(&[history_key(user_id)]).await {
            tracing::warn!(user_id, error = %e, "Failed to clear history after preset switch");
        }

        tracing::info!(user_id, preset = %label, "Preset switched");
        Ok(())
    }

    /// Stored history, oldest first. Undecodable entries are skipped.
    pub async fn get_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>> {
        Ok(self.load_history(user_id).await?.entries)
    }

    /// Stored history with the raw layout needed to trim it.
    pub async fn load_history(&self, user_id: i64) -> Result<StoredHistory> {
        let raw = self.kv.lrange_all(&history_key(user_id)).await?;
        let mut history = StoredHistory {
            entries: Vec::with_capacity(raw.len()),
            positions: Vec::with_capacity(raw.len()),
            raw_len: raw.len(),
        };
        for (index, item) in raw.iter().enumerate() {
            match serde_json::from_str::<HistoryEntry>(item) {
                Ok(entry) => {
                    history.entries.push(entry);
                    history.positions.push(index);
                }
                Err(e) => {
                    tracing::warn!(user_id, index, error = %e, "Skipping undecodable history entry");
                }
            }
        }
        Ok(history)
    }

    /// Append one user/assistant exchange and refresh the history TTL.
    pub async fn append_exchange(
        &self,
        user_id: i64,
        user_msg: &str,
        assistant_msg: &str,
    ) -> Result<()> {
        let key = history_key(user_id);
        let values = [
            serde_json::to_string(&ChatMessage::user(user_msg))?,
            serde_json::to_string(&ChatMessage::assistant(assistant_msg))?,
        ];
        self.kv.rpush(&key, &values).await?;
        self.kv.expire(&key, self.config.history_ttl()).await?;
        Ok(())
    }

    /// Remove exactly `count` raw list elements from the front of the history.
    pub async fn evict_oldest(&self, user_id: i64, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.kv.ltrim_front(&history_key(user_id), count).await?;
        Ok(())
    }

    /// Delete both preset and history.
    pub async fn clear_all(&self, user_id: i64) -> Result<()> {
        self.kv
            .del(&[history_key(user_id), preset_key(user_id)])
            .await?;
        Ok(())
    }
}
