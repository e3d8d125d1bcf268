//! TTL cache for resolved secret values.
//!
//! Entries expire lazily on read and are also removed by a background sweeper
//! that runs once per TTL interval, so memory does not grow with names that
//! are asked for once and never again.
//!
//! Every [`SecretCache::clear`] starts a new generation. A lookup that began
//! before the clear writes back through [`SecretCache::put_if_current`] and is
//! dropped, so a cleared cache never gets a pre-clear value back.
//!
//! A TTL of zero disables caching entirely: `get` always misses, `put` is a
//! no-op and no sweeper task is spawned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::types::SecretString;

/// A cached value with its expiry instant.
#[derive(Clone)]
struct CacheEntry {
    value: SecretString,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct CacheInner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Bumped under the entries write lock by every clear.
    generation: AtomicU64,
}

impl CacheInner {
    /// Remove all expired entries, returning how many were dropped.
    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired_at(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }
}

struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Thread-safe TTL cache keyed by secret name.
pub struct SecretCache {
    inner: Arc<CacheInner>,
    ttl: Duration,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl SecretCache {
    /// Create a cache with the given TTL.
    ///
    /// When called inside a tokio runtime and `ttl` is non-zero, the expiry
    /// sweeper is spawned immediately. Outside a runtime the cache still works
    /// but only expires entries lazily.
    pub fn new(ttl: Duration) -> Self {
        let inner = Arc::new(CacheInner::default());
        let sweeper = if ttl.is_zero() {
            info!("Secret cache disabled (ttl = 0)");
            None
        } else {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => Some(spawn_sweeper(&runtime, inner.clone(), ttl)),
                Err(_) => {
                    debug!("No tokio runtime available; secret cache sweeper not started");
                    None
                }
            }
        };

        Self { inner, ttl, sweeper: Mutex::new(sweeper) }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether values are cached at all.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Get a cached value if present and not expired.
    pub fn get(&self, name: &str) -> Option<SecretString> {
        if !self.is_enabled() {
            return None;
        }

        let entries = self.inner.entries.read().ok()?;
        let hit = entries
            .get(name)
            .filter(|entry| !entry.is_expired_at(Instant::now()))
            .map(|entry| entry.value.clone());

        match hit {
            Some(value) => {
                metrics::counter!("secret_cache_hits_total").increment(1);
                Some(value)
            }
            None => {
                metrics::counter!("secret_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Store a value, replacing any previous entry for the name.
    pub fn put(&self, name: &str, value: SecretString) {
        if !self.is_enabled() {
            return;
        }

        if let Ok(mut entries) = self.inner.entries.write() {
            let expires_at = Instant::now() + self.ttl;
            entries.insert(name.to_string(), CacheEntry { value, expires_at });
        }
    }

    /// Current generation; capture it before going upstream.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Store a value only if no clear happened since `generation` was read.
    /// Returns whether the value was stored.
    pub fn put_if_current(&self, name: &str, value: SecretString, generation: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }

        match self.inner.entries.write() {
            Ok(mut entries) => {
                if self.inner.generation.load(Ordering::Acquire) != generation {
                    debug!(secret_name = %name, "Cache cleared during lookup, not storing result");
                    return false;
                }
                let expires_at = Instant::now() + self.ttl;
                entries.insert(name.to_string(), CacheEntry { value, expires_at });
                true
            }
            Err(_) => false,
        }
    }

    /// Drop every entry and start a new generation. Returns how many were removed.
    pub fn clear(&self) -> usize {
        match self.inner.entries.write() {
            Ok(mut entries) => {
                self.inner.generation.fetch_add(1, Ordering::AcqRel);
                let removed = entries.len();
                entries.clear();
                removed
            }
            Err(_) => 0,
        }
    }

    /// Number of stored entries, including any not yet swept.
    pub fn len(&self) -> usize {
        self.inner.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries now, without waiting for the sweeper.
    pub fn cleanup(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Stop the sweeper and wait for it to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().ok().and_then(|mut guard| guard.take());
        if let Some(SweeperHandle { shutdown_tx, handle }) = sweeper {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
            debug!("Secret cache sweeper stopped");
        }
    }

    #[cfg(test)]
    fn sweeper_running(&self) -> bool {
        self.sweeper.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

impl Drop for SecretCache {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(sweeper) = guard.take() {
                let _ = sweeper.shutdown_tx.send(true);
            }
        }
    }
}

fn spawn_sweeper(
    runtime: &tokio::runtime::Handle,
    inner: Arc<CacheInner>,
    ttl: Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + ttl, ttl);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = inner.evict_expired();
                    if removed > 0 {
                        debug!(removed, "Swept expired secret cache entries");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    SweeperHandle { shutdown_tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_get_put() {
        let cache = SecretCache::new(Duration::from_secs(60));

        cache.put("DB_URL", SecretString::new("p@ss"));

        assert_eq!(cache.get("DB_URL"), Some(SecretString::new("p@ss")));
        assert_eq!(cache.get("OTHER"), None);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_entry() {
        let cache = SecretCache::new(Duration::from_secs(60));

        cache.put("DB_URL", SecretString::new("old"));
        cache.put("DB_URL", SecretString::new("new"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("DB_URL"), Some(SecretString::new("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss_before_sweep() {
        let cache = SecretCache::new(Duration::from_secs(10));
        cache.put("DB_URL", SecretString::new("p@ss"));

        tokio::time::advance(Duration::from_secs(10)).await;

        // Entry may still be stored, but must not be returned.
        assert_eq!(cache.get("DB_URL"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = SecretCache::new(Duration::from_secs(10));
        cache.put("A", SecretString::new("1"));
        cache.put("B", SecretString::new("2"));
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(cache.len(), 0);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let cache = SecretCache::new(Duration::from_secs(60));
        cache.put("A", SecretString::new("1"));
        cache.put("B", SecretString::new("2"));

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.get("A"), None);
    }

    #[tokio::test]
    async fn test_put_after_clear_with_stale_generation_is_dropped() {
        let cache = SecretCache::new(Duration::from_secs(60));
        let before = cache.generation();

        cache.clear();

        assert!(!cache.put_if_current("DB_URL", SecretString::new("old"), before));
        assert_eq!(cache.get("DB_URL"), None);

        assert!(cache.put_if_current("DB_URL", SecretString::new("new"), cache.generation()));
        assert_eq!(cache.get("DB_URL"), Some(SecretString::new("new")));
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let cache = SecretCache::new(Duration::ZERO);

        cache.put("DB_URL", SecretString::new("p@ss"));

        assert!(!cache.is_enabled());
        assert!(!cache.sweeper_running());
        assert_eq!(cache.get("DB_URL"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper_and_is_idempotent() {
        let cache = SecretCache::new(Duration::from_secs(1));
        assert!(cache.sweeper_running());

        cache.shutdown().await;
        assert!(!cache.sweeper_running());

        cache.shutdown().await;
    }

    #[test]
    fn test_cache_without_runtime_expires_lazily() {
        let cache = SecretCache::new(Duration::from_millis(20));
        assert!(!cache.sweeper_running());

        cache.put("A", SecretString::new("1"));
        assert!(cache.get("A").is_some());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("A").is_none());
        assert_eq!(cache.cleanup(), 1);
    }
}
