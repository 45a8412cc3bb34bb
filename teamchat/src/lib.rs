//! Teamchat - client core for a multi-agent chat backend.
//!
//! Architecture:
//! - `storage` persists sessions and backups as JSON values by key
//! - `api` submits requests and probes health over HTTP
//! - `channel` keeps a reconnecting socket.io connection for agent replies
//! - `chat` owns sessions and merges both sources into one state

pub mod api;
pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use error::{ChatError, ChatResult};
