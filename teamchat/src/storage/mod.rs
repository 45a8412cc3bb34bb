//! Client-local persistence.

mod codec;
mod persistent;
mod store;

pub use codec::{
    message_backup_key, rehydrate_sessions, BackupEntry, BackupLog, MessageBackup, SessionsCodec,
    CURRENT_SESSION_KEY, SESSIONS_KEY, SOCKET_BACKUP_KEY,
};
pub use persistent::PersistentStore;
pub use store::{FileStore, KeyValueStore, MemoryStore};

#[cfg(test)]
pub(crate) use persistent::tests::BrokenStore;
