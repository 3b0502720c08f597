//! Shared conversation state.
//!
//! One `ConversationStore` instance serves the whole process. The API layer
//! shares it behind a `tokio::sync::Mutex`; the store itself is plain data.

use serde::{Deserialize, Serialize};

/// Fallback system instruction when none is configured.
pub const DEFAULT_INSTRUCTION: &str = "Run a job to start the conversation.";

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
    Assistant,
}

impl Role {
    /// Lowercase wire name, also used when synthesizing message ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

/// A message as received from the upstream API.
///
/// Upstream replies are not guaranteed to carry ids or even content; missing
/// ids are synthesized from role and position when the history is adopted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

/// Ordered, append-only conversation history.
///
/// Invariants:
/// - at most one message with role `system`;
/// - the history never ends with two consecutive assistant messages
///   carrying identical content.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Copy of the current history, in conversation order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Append a user message; the id is `user-{n+1}` where n is the current
    /// length.
    pub fn append_user(&mut self, content: impl Into<String>) -> &Message {
        let message = Message {
            id: format!("user-{}", self.messages.len() + 1),
            role: Role::User,
            content: content.into(),
        };
        self.messages.push(message);
        self.messages.last().expect("just pushed")
    }

    /// Replace the entire history with the canonical list returned by the
    /// upstream API. Ids missing on the wire are synthesized in place.
    pub fn replace_history(&mut self, messages: Vec<IncomingMessage>) {
        self.messages = messages
            .into_iter()
            .enumerate()
            .map(|(index, incoming)| Message {
                id: incoming
                    .id
                    .unwrap_or_else(|| format!("{}-{}", incoming.role.as_str(), index + 1)),
                role: incoming.role,
                content: incoming.content.unwrap_or_default(),
            })
            .collect();
    }

    /// Insert the synthesized system preamble at the front of the history
    /// unless a system message already exists. Idempotent.
    ///
    /// Inserting at the front keeps the preamble out of the way of the
    /// trailing-assistant duplicate check, so the history still ends with
    /// the latest reply.
    pub fn ensure_system_preamble(&mut self, instruction: Option<&str>) {
        if self.messages.iter().any(|m| m.role == Role::System) {
            return;
        }
        let instruction = instruction.unwrap_or(DEFAULT_INSTRUCTION);
        self.messages.insert(
            0,
            Message {
                id: "system-001".to_string(),
                role: Role::System,
                content: format!("Hi, {instruction}"),
            },
        );
    }

    /// Append an assistant message unless the history already ends with an
    /// assistant message carrying the same content.
    pub fn append_assistant_if_new(&mut self, content: &str) {
        let duplicate = self
            .messages
            .last()
            .is_some_and(|last| last.role == Role::Assistant && last.content == content);
        if duplicate {
            return;
        }
        self.messages.push(Message {
            id: format!("assistant-{}", self.messages.len() + 1),
            role: Role::Assistant,
            content: content.to_string(),
        });
    }
}
