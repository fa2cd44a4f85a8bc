use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::time::sleep;
use uuid::Uuid;

use super::errors::GuardedError;
use crate::metrics::Metrics;
use crate::store::KvStore;

// ============================================================================
// Distributed Lock - per-key leases over a shared KV store
// ============================================================================
//
// acquire  : SET key token NX with an expiry (the lease)
// release  : compare-and-delete, only the token that acquired may release
// wait     : retry acquire on a short fixed interval, give up after max_wait
// guarded  : acquire, run, release on every exit path
//
// There is no lease renewal. A holder that runs past its lease can overlap
// with the next holder, so critical sections must stay well inside the lease.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Prepended to every resource key.
    pub key_prefix: String,
    /// Lease used by `execute_default`.
    pub default_lease: Duration,
    /// Wait budget used by `execute_default`.
    pub default_wait: Duration,
    /// Pause between acquire attempts while waiting.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            default_lease: Duration::from_secs(30),
            default_wait: Duration::from_secs(3),
            retry_interval: Duration::from_millis(10),
        }
    }
}

/// Opaque holder token. Whoever presents it may release the lease.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    config: LockConfig,
    metrics: Arc<Metrics>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, config: LockConfig, metrics: Arc<Metrics>) -> Self {
        Self { store, config, metrics }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Try once. Returns whether `token` now holds `key`.
    pub async fn acquire(&self, key: &str, token: &LockToken, lease: Duration) -> anyhow::Result<bool> {
        let full_key = self.full_key(key);
        let acquired = self.store.set_if_absent(&full_key, token.as_str(), lease).await?;

        tracing::debug!(
            lock_key = %full_key,
            acquired = acquired,
            lease_ms = lease.as_millis() as u64,
            "Lock acquire attempt"
        );

        Ok(acquired)
    }

    /// Release `key` if and only if `token` still holds it.
    ///
    /// A `false` result means the lease already expired and possibly passed
    /// to someone else; that holder's lock is left untouched.
    pub async fn release(&self, key: &str, token: &LockToken) -> anyhow::Result<bool> {
        let full_key = self.full_key(key);
        let released = self.store.delete_if_equals(&full_key, token.as_str()).await?;

        if released {
            tracing::debug!(lock_key = %full_key, "Lock released");
        } else {
            self.metrics.record_release_mismatch();
            tracing::warn!(
                lock_key = %full_key,
                token = %token,
                "Lock release refused: token no longer holds the lease"
            );
        }

        Ok(released)
    }

    /// Retry `acquire` every `retry_interval` until `max_wait` has elapsed.
    /// Always makes at least one attempt. Timing out is `Ok(false)`.
    pub async fn lock_and_wait(
        &self,
        key: &str,
        token: &LockToken,
        lease: Duration,
        max_wait: Duration,
    ) -> anyhow::Result<bool> {
        let started = Instant::now();

        loop {
            if self.acquire(key, token, lease).await? {
                self.metrics
                    .record_lock_wait("acquired", started.elapsed().as_secs_f64());
                return Ok(true);
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                self.metrics.record_lock_wait("timeout", waited.as_secs_f64());
                tracing::warn!(
                    lock_key = %self.full_key(key),
                    waited_ms = waited.as_millis() as u64,
                    "Timed out waiting for lock"
                );
                return Ok(false);
            }

            sleep(self.config.retry_interval.min(max_wait - waited)).await;
        }
    }

    /// Run `body` while holding `key`.
    ///
    /// The lease is released after the body returns `Ok`, returns `Err`, or
    /// panics (the panic is resumed after release). If the caller drops the
    /// returned future mid-body, the lease simply expires.
    pub async fn execute_guarded<T, E, F, Fut>(
        &self,
        key: &str,
        lease: Duration,
        max_wait: Duration,
        body: F,
    ) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = LockToken::generate();

        let acquired = self
            .lock_and_wait(key, &token, lease, max_wait)
            .await
            .map_err(GuardedError::Store)?;
        if !acquired {
            return Err(GuardedError::Contention {
                key: key.to_string(),
                waited: max_wait,
            });
        }

        let started = Instant::now();
        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        let held = started.elapsed();

        if held > lease {
            tracing::warn!(
                lock_key = %self.full_key(key),
                held_ms = held.as_millis() as u64,
                lease_ms = lease.as_millis() as u64,
                "Critical section outlived its lease"
            );
        }

        if let Err(e) = self.release(key, &token).await {
            // The lease expires on its own; the body's result still stands.
            tracing::error!(
                lock_key = %self.full_key(key),
                error = %e,
                "Failed to release lock"
            );
        }

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(GuardedError::Body(err)),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// `execute_guarded` with the configured default lease and wait.
    pub async fn execute_default<T, E, F, Fut>(&self, key: &str, body: F) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_guarded(key, self.config.default_lease, self.config.default_wait, body)
            .await
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
