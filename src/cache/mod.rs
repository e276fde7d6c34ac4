//! Artifact cache.
//!
//! Combined output is kept in an [`ArtifactStore`] under its fingerprint, with
//! pre-compressed variants next to it:
//!
//! ```text
//! 3f2a...c9        identity artifact
//! 3f2a...c9_gzip   gzip variant
//! 3f2a...c9_br     brotli variant
//! ```
//!
//! The in-process store is sized via the `[cache]` section of `tessera.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! entry_limit = 512
//! ```

mod config;
mod inflight;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use inflight::{BuildLocks, BuildSlot};
pub use keys::ArtifactKey;
pub use store::{ArtifactStore, MemoryStore, StoreError};
