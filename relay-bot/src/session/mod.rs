//! Conversation sessions: per-user preset, history and prompt assembly.

pub mod store;
pub mod trimmer;
pub mod types;

pub use store::{SessionStore, StoredHistory};
pub use trimmer::{build_prompt, PromptWindow};
pub use types::{ChatMessage, HistoryEntry, Preset, Role};
