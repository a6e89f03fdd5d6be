//! # Conversation Log
//!
//! The ordered, append-only message history threaded through every stage.
//! Stages read it by reference and hand back an appended copy; nothing can
//! remove or rewrite a message once it is in the log.

use serde::{Deserialize, Serialize};

use crate::stages::StageId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single authored message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    /// Stage that authored the message; `None` for user/system input
    pub author: Option<StageId>,
    pub text: String,
    /// Position in the log, assigned on append
    pub ordinal: usize,
}

impl Message {
    /// Display name of the author
    pub fn author_name(&self) -> &'static str {
        match (self.author, self.role) {
            (Some(stage), _) => stage.author_name(),
            (None, Role::User) => "user",
            (None, Role::System) => "system",
            (None, Role::Assistant) => "assistant",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation from the user's topic
    pub fn seed(topic: &str) -> Self {
        Self::default().appended(Role::User, None, topic)
    }

    /// Return a copy with one more message at the end
    pub fn appended(&self, role: Role, author: Option<StageId>, text: impl Into<String>) -> Self {
        let mut messages = self.messages.clone();
        messages.push(Message {
            role,
            author,
            text: text.into(),
            ordinal: self.messages.len(),
        });
        Self { messages }
    }

    /// Append an assistant message authored by `stage`
    pub fn with_output(&self, stage: StageId, text: impl Into<String>) -> Self {
        self.appended(Role::Assistant, Some(stage), text)
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

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The first non-empty user message, trimmed
    pub fn topic(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User && !m.text.trim().is_empty())
            .map(|m| m.text.trim())
    }

    /// Most recent assistant message authored by `stage`
    pub fn latest_from(&self, stage: StageId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.author == Some(stage))
    }

    /// Whether `other` starts with exactly this conversation's messages
    pub fn is_prefix_of(&self, other: &Conversation) -> bool {
        other.messages.len() >= self.messages.len()
            && other.messages[..self.messages.len()] == self.messages[..]
    }
}
