//! Prompt assembly under a character budget.
//!
//! History is evicted oldest first until the system instruction, the remaining
//! history and the new user message fit the budget. Lengths are counted in
//! Unicode scalar values so multi-byte scripts are measured the same as ASCII.
//!
//! Nothing here touches storage. The caller removes exactly
//! [`PromptWindow::evicted`] decoded entries from the front of the persisted
//! history so the store matches what was sent upstream.

use super::types::{ChatMessage, HistoryEntry};

/// Messages to send plus how many history entries were dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptWindow {
    /// System instruction, surviving history, new user message, in that order.
    pub messages: Vec<ChatMessage>,
    /// Entries removed from the front of the history.
    pub evicted: usize,
}

impl PromptWindow {
    /// Total characters across all messages.
    pub fn char_len(&self) -> usize {
        self.messages.iter().map(ChatMessage::char_len).sum()
    }
}

/// Build the prompt for one turn.
///
/// If the system instruction and new message alone exceed `budget`, every
/// history entry is evicted and the oversized prompt is still returned.
pub fn build_prompt(
    system_instruction: &str,
    history: Vec<HistoryEntry>,
    new_user_message: &str,
    budget: usize,
) -> PromptWindow {
    let system = ChatMessage::system(system_instruction);
    let user = ChatMessage::user(new_user_message);

    let mut total = system.char_len()
        + user.char_len()
        + history.iter().map(ChatMessage::char_len).sum::<usize>();

    let mut evicted = 0;
    while total > budget && evicted < history.len() {
        total -= history[evicted].char_len();
        evicted += 1;
    }

    let mut messages = Vec::with_capacity(history.len() - evicted + 2);
    messages.push(system);
    messages.extend(history.into_iter().skip(evicted));
    messages.push(user);

    PromptWindow { messages, evicted }
}
