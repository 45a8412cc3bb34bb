//! Session model representing one conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

/// Title given to freshly created sessions.
pub const DEFAULT_TITLE: &str = "New conversation";

/// A titled, ordered conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Unique session identifier.
    pub id: String,
    /// Display label.
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Bumped on every message mutation.
    pub updated_at: DateTime<Utc>,
    /// Messages in arrival order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Messages that arrived while the session was not focused.
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub archived: bool,
}

impl ChatSession {
    /// Create a new, empty session.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            unread_count: 0,
            archived: false,
        }
    }

    /// Append a message, evicting from the head so at most `cap` remain.
    pub fn push_message(&mut self, message: Message, cap: usize) {
        self.messages.push(message);
        self.enforce_cap(cap);
        self.touch();
    }

    /// Drop the oldest messages until at most `cap` remain.
    pub fn enforce_cap(&mut self, cap: usize) {
        if self.messages.len() > cap {
            let excess = self.messages.len() - cap;
            self.messages.drain(..excess);
        }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Apply `f` to the message with `id`, bumping `updated_at` if found.
    pub fn update_message<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        f(message);
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
