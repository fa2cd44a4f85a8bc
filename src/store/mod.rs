// ============================================================================
// Store Ports - External collaborators behind injectable handles
// ============================================================================
//
// Every piece of shared state (locks, cache entries, stock, orders, coupons)
// lives behind one of these traits. Components receive `Arc<dyn ...>` handles
// at construction time; nothing here is a process-wide singleton.
//
// Implementations:
// - redis.rs    - KvStore over Redis (locks + cache)
// - postgres.rs - Stock / order / coupon repositories over Postgres (sqlx)
// - memory.rs   - In-process versions of every port (tests, local runs)
//
// ============================================================================

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::coupon::{CouponError, CouponSnapshot};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::stock::ProductSnapshot;

pub mod memory;
pub mod postgres;
pub mod redis;

pub use self::memory::{
    MemoryCouponService, MemoryKvStore, MemoryOrderRepository, MemoryStockRepository,
};
pub use self::postgres::PgStore;
pub use self::redis::RedisKvStore;

/// Shared key-value store used for lock leases and cached values.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` only if it does not exist. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write with expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically delete `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Delete every key matching a glob-style pattern (`prefix*`).
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64>;
}

/// Durable stock and product catalog access.
#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn find_stock(&self, product_id: Uuid) -> Result<Option<i32>>;

    /// Conditional decrement. Affects zero rows when available < quantity.
    async fn decrement_if_available(&self, product_id: Uuid, quantity: i32) -> Result<u64>;

    /// Unconditional increment. Affects zero rows only for unknown products.
    async fn increment(&self, product_id: Uuid, quantity: i32) -> Result<u64>;

    async fn find_product(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>>;
}

/// A staged order write (header + lines) awaiting commit or rollback.
#[async_trait]
pub trait OrderTransaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Durable order storage.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Write header and lines inside one transaction without committing it.
    async fn stage(&self, order: &Order) -> Result<Box<dyn OrderTransaction>>;

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>>;

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>>;

    /// Newest first.
    async fn find_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>>;

    /// Compare-and-set on the status column. Returns false when the row was
    /// no longer in `from`. The matching timestamp column is set to `at`.
    async fn update_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// PendingPayment orders created strictly before `cutoff`, oldest first.
    async fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>>;
}

/// Coupon capability consumed by order creation.
#[async_trait]
pub trait CouponService: Send + Sync {
    async fn find_user_coupon(&self, user_coupon_id: Uuid) -> Result<Option<CouponSnapshot>>;

    fn calculate_discount(
        &self,
        coupon: &CouponSnapshot,
        amount: Decimal,
    ) -> std::result::Result<Decimal, CouponError>;

    async fn mark_used(&self, user_coupon_id: Uuid, order_id: Uuid) -> Result<()>;
}
