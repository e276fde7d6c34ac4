//! Artifact storage.
//!
//! `ArtifactStore` is the seam to whatever keeps combined output between requests.
//! `MemoryStore` is the in-process LRU implementation shipped with the crate.

use std::{io, sync::RwLock};

use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::combine::CacheArtifact;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact `{key}` is not in the store")]
    Missing { key: String },
    #[error("failed to write artifact `{key}`: {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("store backend failed: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing { key: key.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Persistence contract for combined artifacts.
///
/// Keys are fingerprints, optionally suffixed with `_<encoding>` for pre-compressed
/// variants. Implementations must be safe to share across request threads.
pub trait ArtifactStore: Send + Sync {
    /// An entry exists under `key` and was stored no earlier than `since`
    /// (compared at one-second precision).
    fn is_valid(&self, key: &str, since: OffsetDateTime) -> bool;

    /// Byte length of the stored content.
    fn get_size(&self, key: &str) -> Result<u64, StoreError>;

    fn store(&self, key: &str, artifact: &CacheArtifact) -> Result<(), StoreError>;

    fn fetch(&self, key: &str) -> Result<CacheArtifact, StoreError>;

    /// Write the stored content to `out`, returning the number of bytes written.
    fn display(&self, key: &str, out: &mut dyn io::Write) -> Result<u64, StoreError> {
        let artifact = self.fetch(key)?;
        out.write_all(&artifact.content)
            .map_err(|source| StoreError::Write {
                key: key.to_string(),
                source,
            })?;
        Ok(artifact.content.len() as u64)
    }

    /// Whether `display` streams without loading the whole artifact first.
    fn supports_display(&self) -> bool {
        false
    }
}

#[derive(Clone)]
struct StoredArtifact {
    artifact: CacheArtifact,
    stored_at: OffsetDateTime,
}

/// In-memory LRU artifact store.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, StoredArtifact>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.entry_limit_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    fn stored(&self, key: &str, op: &'static str) -> Result<StoredArtifact, StoreError> {
        rw_write(&self.entries, SOURCE, op)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::missing(key))
    }
}

impl ArtifactStore for MemoryStore {
    fn is_valid(&self, key: &str, since: OffsetDateTime) -> bool {
        rw_read(&self.entries, SOURCE, "is_valid")
            .peek(key)
            .is_some_and(|entry| entry.stored_at.unix_timestamp() >= since.unix_timestamp())
    }

    fn get_size(&self, key: &str) -> Result<u64, StoreError> {
        rw_read(&self.entries, SOURCE, "get_size")
            .peek(key)
            .map(|entry| entry.artifact.content.len() as u64)
            .ok_or_else(|| StoreError::missing(key))
    }

    fn store(&self, key: &str, artifact: &CacheArtifact) -> Result<(), StoreError> {
        let entry = StoredArtifact {
            artifact: artifact.clone(),
            stored_at: OffsetDateTime::now_utc(),
        };
        let evicted = rw_write(&self.entries, SOURCE, "store").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted.filter(|(evicted_key, _)| evicted_key != key) {
            counter!("tessera_store_evict_total").increment(1);
            debug!(
                target = "tessera::cache::store",
                op = "store",
                result = "evicted",
                evicted_key = %evicted_key,
                "Evicted least recently used artifact"
            );
        }
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<CacheArtifact, StoreError> {
        self.stored(key, "fetch").map(|entry| entry.artifact)
    }

    fn display(&self, key: &str, out: &mut dyn io::Write) -> Result<u64, StoreError> {
        let entry = self.stored(key, "display")?;
        let content = &entry.artifact.content;
        out.write_all(content).map_err(|source| StoreError::Write {
            key: key.to_string(),
            source,
        })?;
        Ok(content.len() as u64)
    }

    fn supports_display(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use bytes::Bytes;
    use time::Duration;

    use super::*;

    fn artifact(text: &'static str) -> CacheArtifact {
        CacheArtifact::new(Bytes::from(text), text.len() * 2)
    }

    #[test]
    fn store_fetch_and_display() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.store("abc", &artifact("body{}")).expect("stored");

        assert_eq!(store.get_size("abc").expect("size"), 6);
        let fetched = store.fetch("abc").expect("fetched");
        assert_eq!(fetched.content, Bytes::from("body{}"));
        assert_eq!(fetched.original_length, 12);

        let mut out = Vec::new();
        assert_eq!(store.display("abc", &mut out).expect("displayed"), 6);
        assert_eq!(out, b"body{}");
        assert!(store.supports_display());
    }

    #[test]
    fn missing_keys_are_errors() {
        let store = MemoryStore::new(&CacheConfig::default());
        assert!(matches!(store.fetch("nope"), Err(StoreError::Missing { .. })));
        assert!(store.get_size("nope").is_err());
        assert!(!store.is_valid("nope", OffsetDateTime::UNIX_EPOCH));
    }

    #[test]
    fn validity_tracks_store_time() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.store("abc", &artifact("x")).expect("stored");

        let now = OffsetDateTime::now_utc();
        assert!(store.is_valid("abc", now - Duration::hours(1)));
        assert!(!store.is_valid("abc", now + Duration::hours(1)));
    }

    #[test]
    fn lru_eviction() {
        let config = CacheConfig {
            entry_limit: 2,
            ..Default::default()
        };
        let store = MemoryStore::new(&config);
        store.store("a", &artifact("a")).expect("stored");
        store.store("b", &artifact("b")).expect("stored");
        store.fetch("a").expect("touch a");
        store.store("c", &artifact("c")).expect("stored");

        assert!(store.fetch("a").is_ok());
        assert!(store.fetch("b").is_err());
        assert!(store.fetch("c").is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let store = MemoryStore::new(&CacheConfig::default());
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.store("abc", &artifact("x")).expect("stored after poison");
        assert!(store.fetch("abc").is_ok());
    }
}
