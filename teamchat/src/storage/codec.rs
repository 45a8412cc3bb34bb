//! Typed codecs for every persisted entity.
//!
//! Timestamps are stored as RFC 3339 strings and come back as `DateTime<Utc>`
//! through serde, so no call site coerces dates by hand.

use std::collections::HashSet;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::persistent::PersistentStore;
use crate::models::{ChatSession, Message};

/// Key holding the full session collection.
pub const SESSIONS_KEY: &str = "chat_sessions";
/// Key holding the id of the focused session.
pub const CURRENT_SESSION_KEY: &str = "current_session";
/// Key holding the recent realtime message log.
pub const SOCKET_BACKUP_KEY: &str = "socket_message_backup";

/// Key of the ephemeral backup for one message.
pub fn message_backup_key(message_id: &str) -> String {
    format!("message_backup_{message_id}")
}

/// Normalize sessions read back from storage.
///
/// Drops duplicated session ids (first one wins) and re-derives every
/// message's code blocks from its content.
pub fn rehydrate_sessions(sessions: Vec<ChatSession>) -> Vec<ChatSession> {
    let mut seen = HashSet::new();
    sessions
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .map(|mut s| {
            for message in &mut s.messages {
                message.refresh_code_blocks();
            }
            s
        })
        .collect()
}

/// Codec for the session collection and the focus pointer.
#[derive(Debug, Clone)]
pub struct SessionsCodec {
    store: PersistentStore,
}

impl SessionsCodec {
    pub const fn new(store: PersistentStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Vec<ChatSession> {
        self.store
            .read(SESSIONS_KEY, Vec::new(), Some(rehydrate_sessions))
    }

    pub fn save(&self, sessions: &[ChatSession]) -> bool {
        self.store.write(SESSIONS_KEY, sessions)
    }

    pub fn load_current(&self) -> Option<String> {
        self.store.read(CURRENT_SESSION_KEY, None, None)
    }

    pub fn save_current(&self, id: Option<&str>) -> bool {
        match id {
            Some(id) => self.store.write(CURRENT_SESSION_KEY, id),
            None => {
                self.store.remove(CURRENT_SESSION_KEY);
                true
            }
        }
    }
}

/// Codec for single-message backups.
#[derive(Debug, Clone)]
pub struct MessageBackup {
    store: PersistentStore,
}

impl MessageBackup {
    pub const fn new(store: PersistentStore) -> Self {
        Self { store }
    }

    pub fn save(&self, message: &Message) -> bool {
        self.store.write(&message_backup_key(&message.id), message)
    }

    pub fn restore(&self, message_id: &str) -> Option<Message> {
        self.store.read(&message_backup_key(message_id), None, None)
    }

    pub fn discard(&self, message_id: &str) {
        self.store.remove(&message_backup_key(message_id));
    }
}

/// One entry of a [`BackupLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry<T> {
    #[serde(flatten)]
    pub item: T,
    pub backup_timestamp: DateTime<Utc>,
}

/// A bounded, most-recent-N log stored under a single key.
#[derive(Debug, Clone)]
pub struct BackupLog<T> {
    store: PersistentStore,
    key: String,
    limit: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> BackupLog<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(store: PersistentStore, key: impl Into<String>, limit: usize) -> Self {
        Self {
            store,
            key: key.into(),
            limit,
            _item: PhantomData,
        }
    }

    /// Append `item`, dropping the oldest entries beyond the limit.
    pub fn append(&self, item: &T) -> bool {
        let mut entries = self.entries();
        entries.push(BackupEntry {
            item: item.clone(),
            backup_timestamp: Utc::now(),
        });
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
        self.store.write(&self.key, &entries)
    }

    pub fn entries(&self) -> Vec<BackupEntry<T>> {
        self.store.read(&self.key, Vec::new(), None)
    }
}
