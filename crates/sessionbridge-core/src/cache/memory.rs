use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::SessionCache;
use crate::error::CacheError;
use crate::models::CachedSession;

/// In-process session cache. Failures and read latency can be injected,
/// which makes it the workhorse for bootstrapper tests and the CLI demo.
#[derive(Default)]
pub struct MemorySessionCache {
    session: Mutex<Option<CachedSession>>,
    load_delay: Option<Duration>,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    fail_clear: AtomicBool,
    saves: AtomicUsize,
    clears: AtomicUsize,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: CachedSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            ..Self::default()
        }
    }

    /// Make every `load` take this long.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    /// What is stored right now, bypassing failure injection.
    pub fn current(&self) -> Option<CachedSession> {
        self.lock().clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of successful clears
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CachedSession>> {
        // A panic while holding the lock cannot leave the Option half-written
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn load(&self) -> Result<Option<CachedSession>, CacheError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(CacheError::Read(io::Error::other("injected read failure")));
        }
        Ok(self.lock().clone())
    }

    async fn save(&self, session: &CachedSession) -> Result<(), CacheError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(CacheError::Write(io::Error::other("injected write failure")));
        }
        *self.lock() = Some(session.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(CacheError::Write(io::Error::other("injected clear failure")));
        }
        *self.lock() = None;
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderUser, UserProfile};

    fn session() -> CachedSession {
        CachedSession::new(UserProfile::from(ProviderUser::new("u1")), "tok")
    }

    #[tokio::test]
    async fn test_memory_cache_roundtrip_and_counts() {
        let cache = MemorySessionCache::new();
        assert!(cache.load().await.unwrap().is_none());

        let saved = session();
        cache.save(&saved).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), Some(saved));
        assert_eq!(cache.save_count(), 1);

        cache.clear().await.unwrap();
        assert!(cache.current().is_none());
        assert_eq!(cache.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_cache_injected_failures() {
        let cache = MemorySessionCache::with_session(session());

        cache.set_fail_load(true);
        assert!(matches!(cache.load().await, Err(CacheError::Read(_))));

        cache.set_fail_save(true);
        assert!(matches!(cache.save(&session()).await, Err(CacheError::Write(_))));
        assert_eq!(cache.save_count(), 0);

        cache.set_fail_clear(true);
        assert!(cache.clear().await.is_err());
        // Failed clear leaves the stored session in place
        assert!(cache.current().is_some());
    }
}
