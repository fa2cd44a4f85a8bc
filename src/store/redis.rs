use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::KvStore;

// ============================================================================
// Redis KvStore - lease and cache storage
// ============================================================================
//
// SET NX PX for lease acquisition, a Lua compare-and-delete for release, and
// SCAN + DEL for pattern deletes. The connection manager is cheap to clone
// and reconnects on its own.
//
// ============================================================================

const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
"#;

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisKvStore {
    conn_manager: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client for {redis_url}"))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;

        tracing::info!(redis_url = %redis_url, "Connected to Redis");
        Ok(Self { conn_manager })
    }
}

/// Redis rejects a zero expiry, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("SET NX failed for {key}"))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("GET failed for {key}"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .pset_ex(key, value, ttl_millis(ttl))
            .await
            .with_context(|| format!("PSETEX failed for {key}"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn
            .del(key)
            .await
            .with_context(|| format!("DEL failed for {key}"))?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Compare-and-delete failed for {key}"))?;
        Ok(removed == 1)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("SCAN failed for pattern {pattern}"))?;

            if !keys.is_empty() {
                let n: u64 = conn
                    .del(&keys)
                    .await
                    .with_context(|| format!("DEL failed for pattern {pattern}"))?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(pattern = %pattern, removed = removed, "Deleted keys by pattern");
        Ok(removed)
    }
}
