//! Message model representing a single entry in a chat session.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text shown in place of a tombstoned message.
pub const DELETED_PLACEHOLDER: &str = "This message has been deleted";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(\w+)?\n([\s\S]*?)```").expect("code fence pattern"));

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by the local user.
    User,
    /// Message produced by one of the backend agents.
    Assistant,
}

impl MessageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery status of a locally-originated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Appended optimistically, request still in flight.
    Sending,
    /// Accepted by the backend (or received from it).
    Sent,
    /// The backing request failed; the message can be retried.
    Failed,
}

impl MessageStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fenced code segment extracted from message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// Extract every fenced code block from `content`.
///
/// Blocks without a language tag are labelled `text`. The result depends only
/// on `content`, so calling it again after an edit always yields the current
/// set of blocks.
pub fn extract_code_blocks(content: &str) -> Vec<CodeBlock> {
    CODE_FENCE
        .captures_iter(content)
        .map(|caps| CodeBlock {
            language: caps
                .get(1)
                .map_or_else(|| "text".to_string(), |m| m.as_str().to_string()),
            code: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// A message in a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier, generated when the message is created.
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Name of the agent that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub status: MessageStatus,
    /// Id of the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_blocks: Option<Vec<CodeBlock>>,
}

impl Message {
    /// Create an outgoing user message in `sending` state.
    pub fn user(content: impl Into<String>, reply_to: Option<String>) -> Self {
        let mut message = Self::base(MessageRole::User, content.into(), MessageStatus::Sending);
        message.reply_to = reply_to;
        message
    }

    /// Create an inbound assistant message, already `sent`.
    pub fn assistant(content: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let mut message = Self::base(MessageRole::Assistant, content.into(), MessageStatus::Sent);
        message.agent_name = Some(agent_name.into());
        message
    }

    fn base(role: MessageRole, content: String, status: MessageStatus) -> Self {
        let mut message = Self {
            id: Uuid::now_v7().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            agent_name: None,
            status,
            reply_to: None,
            edited: false,
            deleted: false,
            code_blocks: None,
        };
        message.refresh_code_blocks();
        message
    }

    /// Re-derive `code_blocks` from the current content.
    pub fn refresh_code_blocks(&mut self) {
        let blocks = extract_code_blocks(&self.content);
        self.code_blocks = if blocks.is_empty() { None } else { Some(blocks) };
    }

    /// Replace the content and mark the message as edited.
    pub fn edit(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.edited = true;
        self.refresh_code_blocks();
    }

    /// Text to render for this message; tombstones never show their content.
    pub fn display_content(&self) -> &str {
        if self.deleted {
            DELETED_PLACEHOLDER
        } else {
            &self.content
        }
    }
}
