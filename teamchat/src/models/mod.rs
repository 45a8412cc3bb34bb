//! Data models for teamchat entities.

mod agent;
mod message;
mod session;

pub use agent::{find_agent, Agent, DEFAULT_AGENTS};
pub use message::{
    extract_code_blocks, CodeBlock, Message, MessageRole, MessageStatus, DELETED_PLACEHOLDER,
};
pub use session::{ChatSession, DEFAULT_TITLE};
