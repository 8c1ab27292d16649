//! Conversation model
//!
//! Messages are append-only. Every operation that changes the state returns a
//! new [`ConversationState`] and leaves its input untouched.

mod message;
mod transcript;

pub use message::{tag_origin, Message, Role, ToolInvocation};
pub use transcript::{plain_transcript, to_llm_messages};

use crate::error::TurnError;
use serde::{Deserialize, Serialize};

/// What the router chose to do next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Next {
    Responder(String),
    Finish,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    #[serde(default)]
    next: Option<Next>,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            next: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn next(&self) -> Option<&Next> {
        self.next.as_ref()
    }

    #[must_use]
    pub fn append(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self {
            messages,
            next: self.next.clone(),
        }
    }

    #[must_use]
    pub fn with_next(&self, next: Next) -> Self {
        Self {
            messages: self.messages.clone(),
            next: Some(next),
        }
    }

    pub fn last_message(&self) -> Result<&Message, TurnError> {
        self.messages.last().ok_or(TurnError::EmptyState)
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Messages at index `start` and later
    pub fn messages_since(&self, start: usize) -> &[Message] {
        self.messages.get(start..).unwrap_or_default()
    }

    /// Responder outputs at index `start` and later, in production order
    pub fn responder_messages_since(&self, start: usize) -> Vec<&Message> {
        self.messages_since(start)
            .iter()
            .filter(|m| m.role == Role::Assistant && m.reply_to.is_some())
            .collect()
    }
}
