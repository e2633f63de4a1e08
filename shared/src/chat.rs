use serde::{Deserialize, Serialize};

use crate::model::{ChatMessage, ChatRole, LocationData};

pub const THINKING_TEXT: &str = "Thinking...";
pub const CHAT_FAILURE_TEXT: &str =
    "Sorry, I'm having trouble connecting to my brain right now. Please try again.";
pub const NO_LOCATION_CONTEXT: &str = "Public area";

/// The place description handed to the assistant.
pub fn chat_context(location: Option<&LocationData>) -> String {
    match location {
        Some(loc) => format!("{} ({})", loc.subject_name(), loc.subject_kind()),
        None => NO_LOCATION_CONTEXT.to_string(),
    }
}

/// Conversation log. Grows without bound and is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

/// Indices of one in-flight exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTurn {
    pub user_index: usize,
    pub reply_index: usize,
}

impl ChatTranscript {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends the user's message and a thinking placeholder after it.
    pub fn begin_turn(&mut self, text: impl Into<String>) -> PendingTurn {
        let user_index = self.messages.len();
        self.messages.push(ChatMessage::user(text));
        self.messages.push(ChatMessage::thinking());
        PendingTurn {
            user_index,
            reply_index: user_index + 1,
        }
    }

    /// Everything said before `turn`, minus placeholders still waiting.
    pub fn history_before(&self, turn: PendingTurn) -> Vec<ChatMessage> {
        self.messages[..turn.user_index.min(self.messages.len())]
            .iter()
            .filter(|m| !m.is_thinking)
            .cloned()
            .collect()
    }

    /// Replaces the placeholder at `index` in place. Returns `false` when
    /// there is no placeholder there.
    pub fn resolve_turn(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.messages.get_mut(index) {
            Some(slot) if slot.is_thinking && slot.role == ChatRole::Model => {
                *slot = ChatMessage::model(text);
                true
            }
            _ => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_thinking).count()
    }
}
