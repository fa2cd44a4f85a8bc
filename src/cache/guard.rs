use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::CacheError;
use crate::lock::{DistributedLock, GuardedError};
use crate::metrics::Metrics;
use crate::store::KvStore;

// ============================================================================
// Cache Guard - read-through cache over the shared KV store
// ============================================================================
//
// Three failure modes of a naive cache, three defenses:
//
//   breakdown   (hot key expires, everyone reloads)  -> per-key rebuild lock,
//                                                      re-check after acquire
//   penetration (key that never exists)              -> short-lived tombstone
//   avalanche   (many keys expire together)          -> jittered TTLs
//
// Writers never update cached values in place; they invalidate.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long a "does not exist" answer is remembered.
    pub tombstone_ttl: Duration,
    /// TTLs are scaled by a uniform factor in [1 - jitter, 1 + jitter].
    pub ttl_jitter: f64,
    pub rebuild_lease: Duration,
    pub rebuild_wait: Duration,
    pub tombstone_prefix: String,
    pub rebuild_lock_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tombstone_ttl: Duration::from_secs(5 * 60),
            ttl_jitter: 0.2,
            rebuild_lease: Duration::from_secs(10),
            rebuild_wait: Duration::from_secs(3),
            tombstone_prefix: "null_cache:".to_string(),
            rebuild_lock_prefix: "cache_lock:".to_string(),
        }
    }
}

enum Lookup<T> {
    Hit(T),
    Tombstone,
    Miss,
}

#[derive(Clone)]
pub struct CacheGuard {
    store: Arc<dyn KvStore>,
    lock: DistributedLock,
    config: CacheConfig,
    metrics: Arc<Metrics>,
}

impl CacheGuard {
    pub fn new(
        store: Arc<dyn KvStore>,
        lock: DistributedLock,
        config: CacheConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            lock,
            config,
            metrics,
        }
    }

    fn tombstone_key(&self, key: &str) -> String {
        format!("{}{}", self.config.tombstone_prefix, key)
    }

    /// Return the cached value for `key`, loading it at most once across
    /// concurrent callers on a miss.
    ///
    /// `Ok(None)` means the loader reported the entity as absent (now or
    /// within the tombstone window). Loader errors are not cached.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        match self.lookup::<T>(key).await? {
            Lookup::Hit(value) => {
                self.metrics.record_cache_lookup("hit");
                return Ok(Some(value));
            }
            Lookup::Tombstone => {
                self.metrics.record_cache_lookup("tombstone");
                return Ok(None);
            }
            Lookup::Miss => {}
        }

        let lock_key = format!("{}{}", self.config.rebuild_lock_prefix, key);
        let result = self
            .lock
            .execute_guarded(
                &lock_key,
                self.config.rebuild_lease,
                self.config.rebuild_wait,
                || self.rebuild(key, ttl, loader),
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(GuardedError::Contention { .. }) => {
                self.metrics.record_cache_lookup("busy");
                tracing::warn!(cache_key = %key, "Cache rebuild lock not acquired in time");
                Err(CacheError::Busy {
                    key: key.to_string(),
                })
            }
            Err(GuardedError::Store(e)) => Err(CacheError::Store(e)),
            Err(GuardedError::Body(e)) => Err(e),
        }
    }

    /// Runs under the rebuild lock.
    async fn rebuild<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        // Whoever held the lock before us may already have filled the entry.
        match self.lookup::<T>(key).await? {
            Lookup::Hit(value) => {
                self.metrics.record_cache_lookup("hit");
                return Ok(Some(value));
            }
            Lookup::Tombstone => {
                self.metrics.record_cache_lookup("tombstone");
                return Ok(None);
            }
            Lookup::Miss => {}
        }

        let loaded = loader().await.map_err(|source| CacheError::Loader {
            key: key.to_string(),
            source,
        })?;

        match loaded {
            Some(value) => {
                let json = serde_json::to_string(&value)
                    .map_err(|e| CacheError::Store(anyhow::Error::new(e)))?;
                let jittered = self.jittered(ttl);
                self.store.set(key, &json, jittered).await?;
                self.metrics.record_cache_lookup("loaded");
                tracing::debug!(
                    cache_key = %key,
                    ttl_ms = jittered.as_millis() as u64,
                    "Cache entry rebuilt"
                );
                Ok(Some(value))
            }
            None => {
                self.store
                    .set(&self.tombstone_key(key), "", self.config.tombstone_ttl)
                    .await?;
                self.metrics.record_cache_lookup("absent");
                tracing::debug!(cache_key = %key, "Tombstone written for absent entity");
                Ok(None)
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Lookup<T>, CacheError> {
        if let Some(raw) = self.store.get(key).await? {
            match serde_json::from_str::<T>(&raw) {
                Ok(value) => return Ok(Lookup::Hit(value)),
                Err(e) => {
                    // Stale schema or garbage; the rebuild overwrites it.
                    tracing::warn!(cache_key = %key, error = %e, "Undecodable cache entry, treating as miss");
                }
            }
        }

        if self.store.get(&self.tombstone_key(key)).await?.is_some() {
            return Ok(Lookup::Tombstone);
        }

        Ok(Lookup::Miss)
    }

    /// Drop both the value and any tombstone for `key`.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(key).await?;
        self.store.delete(&self.tombstone_key(key)).await?;
        tracing::debug!(cache_key = %key, "Cache entry invalidated");
        Ok(())
    }

    /// Drop every value and tombstone whose key starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let values = self.store.delete_by_pattern(&format!("{prefix}*")).await?;
        let tombstones = self
            .store
            .delete_by_pattern(&format!("{}{prefix}*", self.config.tombstone_prefix))
            .await?;

        tracing::info!(prefix = %prefix, removed = values + tombstones, "Cache prefix invalidated");
        Ok(values + tombstones)
    }

    fn jittered(&self, ttl: Duration) -> Duration {
        let jitter = self.config.ttl_jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return ttl;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        ttl.mul_f64(factor).max(Duration::from_millis(1))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
