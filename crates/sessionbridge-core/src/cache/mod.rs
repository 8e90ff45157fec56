//! Persisted session cache.
//!
//! The cache holds the last user the identity provider confirmed, so the
//! next launch can show that user immediately instead of flashing a login
//! screen while the provider is contacted.
//!
//! Implementations:
//! - `FileSessionCache`: JSON file in the cache directory, token optionally
//!   kept in the OS keychain
//! - `MemorySessionCache`: in-process, with failure injection for tests

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::models::CachedSession;

pub use file::FileSessionCache;
pub use memory::MemorySessionCache;

/// Storage for the last confirmed session. Every operation may fail
/// independently.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Read the cached session. `Ok(None)` means nothing is cached.
    async fn load(&self) -> Result<Option<CachedSession>, CacheError>;

    /// Replace the cached session.
    async fn save(&self, session: &CachedSession) -> Result<(), CacheError>;

    /// Forget the cached session. Clearing an empty cache succeeds.
    async fn clear(&self) -> Result<(), CacheError>;
}
