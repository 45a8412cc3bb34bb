//! Fault-tolerant typed access on top of a [`KeyValueStore`].
//!
//! Reads fall back to a default and writes only log on failure, so a broken
//! or missing storage backend never blocks an in-memory state change.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::store::{FileStore, KeyValueStore, MemoryStore};

/// JSON adapter over a shared key/value backend.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn KeyValueStore>,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Purely in-memory storage.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// File storage under `dir`, or memory when `dir` is unusable.
    pub fn open_or_memory(dir: &Path) -> Self {
        match FileStore::open_at(dir) {
            Ok(store) => Self::new(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "durable storage unavailable, falling back to memory");
                Self::memory()
            }
        }
    }

    /// Read and decode `key`, returning `default` when it is missing or
    /// unreadable. `postprocess` runs on successfully decoded values only.
    pub fn read<T>(&self, key: &str, default: T, postprocess: Option<fn(T) -> T>) -> T
    where
        T: DeserializeOwned,
    {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(e) => {
                warn!(key, error = %e, "error reading stored value");
                return default;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => match postprocess {
                Some(f) => f(value),
                None => value,
            },
            Err(e) => {
                warn!(key, error = %e, "stored value is not valid JSON for its type");
                default
            }
        }
    }

    /// Encode and store `value` under `key`. Returns whether it was written.
    pub fn write<T>(&self, key: &str, value: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "failed to encode value");
                return false;
            }
        };

        match self.backend.set(key, &encoded) {
            Ok(()) => {
                debug!(key, bytes = encoded.len(), "persisted");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "failed to persist value");
                false
            }
        }
    }

    /// Remove `key`. Failures are logged.
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!(key, error = %e, "failed to remove stored value");
        }
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::bail;

    /// Backend whose every operation fails.
    pub struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            bail!("storage disabled")
        }

        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            bail!("quota exceeded")
        }

        fn remove(&self, _key: &str) -> anyhow::Result<()> {
            bail!("storage disabled")
        }
    }

    #[test]
    fn read_missing_returns_default() {
        let store = PersistentStore::memory();
        let value: Vec<u32> = store.read("nothing", vec![7], None);
        assert_eq!(value, vec![7]);
    }

    #[test]
    fn read_applies_postprocess() {
        let store = PersistentStore::memory();
        assert!(store.write("numbers", &vec![3, 1, 2]));

        let sorted: Vec<u32> = store.read(
            "numbers",
            Vec::new(),
            Some(|mut v: Vec<u32>| {
                v.sort_unstable();
                v
            }),
        );
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[test]
    fn read_without_postprocess_returns_stored_value() {
        let store = PersistentStore::memory();
        assert!(store.write("numbers", &vec![3, 1, 2]));

        let value: Vec<u32> = store.read("numbers", vec![9], None);
        assert_eq!(value, vec![3, 1, 2]);
    }

    #[test]
    fn corrupt_value_falls_back() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("numbers", "{not json").unwrap();
        let store = PersistentStore::new(backend);

        let value: Vec<u32> = store.read("numbers", Vec::new(), None);
        assert!(value.is_empty());
    }

    #[test]
    fn broken_backend_never_raises() {
        let store = PersistentStore::new(Arc::new(BrokenStore));
        assert!(!store.write("k", &1));
        store.remove("k");
        assert_eq!(store.read("k", 5, None), 5);
    }

    #[test]
    fn unusable_dir_falls_back_to_memory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot be used as a directory.
        let store = PersistentStore::open_or_memory(&file.path().join("sub"));
        assert!(store.write("k", &"v"));
        assert_eq!(store.read("k", String::new(), None), "v");
    }
}
