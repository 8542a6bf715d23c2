//! Snapshot storage: a thread-safe in-memory store for the currently active
//! snapshot, plus the pluggable external key/value cache boundary.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use sha1::{Digest, Sha1};

use crate::snapshot::ConfigSnapshot;

/// Version tag of the persisted cache entry format. Bumped when the entry
/// encoding changes so stale entries from older clients are ignored by key.
const CACHE_FORMAT_VERSION: &str = "v1";

/// A pluggable external key/value cache.
///
/// Implementations may be backed by anything that stores strings (Redis,
/// files, browser storage behind FFI). A faulting cache must not take the
/// client down: errors are logged and the last local snapshot is used instead.
#[async_trait]
pub trait ConfigCache: Send + Sync {
    /// Read the entry stored under `key`. `Ok(None)` means "no entry".
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// Error type for external cache operations.
#[derive(thiserror::Error, Debug)]
#[error("external cache error: {0}")]
pub struct CacheError(pub String);

/// The bundled default [`ConfigCache`]: a process-local map.
///
/// Constructed explicitly and injected at the composition root; there is no
/// hidden process-wide instance, so tests can substitute fakes freely.
#[derive(Default)]
pub struct InMemoryConfigCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryConfigCache {
    /// Create an empty cache.
    pub fn new() -> InMemoryConfigCache {
        InMemoryConfigCache::default()
    }
}

#[async_trait]
impl ConfigCache for InMemoryConfigCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError("poisoned lock".to_owned()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError("poisoned lock".to_owned()))?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Derive the external-cache key for an SDK key. One entry per SDK key and
/// entry-format version.
pub fn cache_key_for(sdk_key: &str) -> String {
    let input = format!("{sdk_key}_flagcast-config-v1.json_{CACHE_FORMAT_VERSION}");
    hex::encode(Sha1::digest(input.as_bytes()))
}

/// Thread-safe storage for the currently active [`ConfigSnapshot`], allowing
/// concurrent access for readers (evaluation) and writers (polling).
///
/// Snapshots are immutable and replaced atomically; a reader keeps the
/// generation it picked up and is never exposed to a partial update.
pub struct SnapshotStore {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
}

impl SnapshotStore {
    /// Create a store holding the empty sentinel snapshot.
    pub fn new() -> SnapshotStore {
        SnapshotStore {
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::empty())),
        }
    }

    /// Get the currently active snapshot.
    pub fn get(&self) -> Arc<ConfigSnapshot> {
        // The lock can only be poisoned if a writer panicked while holding it,
        // which should never happen.
        let snapshot = self
            .snapshot
            .read()
            .expect("thread holding snapshot lock should not panic");
        snapshot.clone()
    }

    /// Replace the active snapshot.
    pub fn set(&self, snapshot: Arc<ConfigSnapshot>) {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding snapshot lock should not panic");
        *slot = snapshot;
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        SnapshotStore::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn store_replaces_snapshot_from_another_thread() {
        let store = Arc::new(SnapshotStore::new());
        assert!(store.get().is_empty());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                let snapshot = ConfigSnapshot::from_body(
                    r#"{"settings": {}}"#.to_owned(),
                    "etag".to_owned(),
                    Utc::now(),
                )
                .unwrap();
                store.set(Arc::new(snapshot));
            })
            .join();
        }

        assert!(!store.get().is_empty());
    }

    #[test]
    fn cache_key_is_stable_per_sdk_key() {
        assert_eq!(
            cache_key_for("test-key"),
            "3f9bd7ed3b0aa1b02dfa9df85460d1d5256829ef"
        );
        assert_ne!(cache_key_for("test-key"), cache_key_for("other-key"));
    }

    #[tokio::test]
    async fn in_memory_cache_round_trips() {
        let cache = InMemoryConfigCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_owned()));
    }
}
