// ============================================================================
// In-Memory Store Adapters
// ============================================================================
//
// Single-process implementations of every port. Used by the test suites and
// for running the service without Redis/Postgres. Each adapter honours the
// same atomicity contract as its networked counterpart: every operation runs
// under one mutex, so SET NX, compare-and-delete, conditional decrement and
// status compare-and-set are all indivisible.
//
// A few `fail_*` switches let tests inject store faults.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{CouponService, KvStore, OrderRepository, OrderTransaction, StockRepository};
use crate::domain::coupon::{self, CouponError, CouponSnapshot, CouponStatus};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::stock::ProductSnapshot;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Glob match supporting `*` only, which is all the cache uses.
fn glob_matches(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((head, rest)) => {
            let Some(tail) = text.strip_prefix(head) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            (0..=tail.len())
                .filter(|i| tail.is_char_boundary(*i))
                .any(|i| glob_matches(rest, &tail[i..]))
        }
    }
}

// ============================================================================
// KV store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        locked(&self.entries)
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop `key` if its TTL has passed, then return the live value.
fn live_value<'a>(
    entries: &'a mut HashMap<String, (String, Instant)>,
    key: &str,
) -> Option<&'a String> {
    let expired = entries
        .get(key)
        .is_some_and(|(_, expires_at)| *expires_at <= Instant::now());
    if expired {
        entries.remove(key);
    }
    entries.get(key).map(|(value, _)| value)
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = locked(&self.entries);
        if live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = locked(&self.entries);
        Ok(live_value(&mut entries, key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        locked(&self.entries).insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = locked(&self.entries);
        let existed = live_value(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = locked(&self.entries);
        if live_value(&mut entries, key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = locked(&self.entries);
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, (_, expires_at))| *expires_at > now && glob_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}

// ============================================================================
// Stock repository
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStockRepository {
    products: Mutex<HashMap<Uuid, (ProductSnapshot, i32)>>,
    fail_increments: AtomicBool,
}

impl MemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product: ProductSnapshot, stock: i32) {
        locked(&self.products).insert(product.id, (product, stock));
    }

    pub fn set_stock(&self, product_id: Uuid, stock: i32) {
        if let Some((_, current)) = locked(&self.products).get_mut(&product_id) {
            *current = stock;
        }
    }

    pub fn stock_of(&self, product_id: Uuid) -> Option<i32> {
        locked(&self.products).get(&product_id).map(|(_, stock)| *stock)
    }

    /// Make every `increment` fail until switched back.
    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StockRepository for MemoryStockRepository {
    async fn find_stock(&self, product_id: Uuid) -> Result<Option<i32>> {
        Ok(self.stock_of(product_id))
    }

    async fn decrement_if_available(&self, product_id: Uuid, quantity: i32) -> Result<u64> {
        let mut products = locked(&self.products);
        match products.get_mut(&product_id) {
            Some((_, stock)) if *stock >= quantity => {
                *stock -= quantity;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn increment(&self, product_id: Uuid, quantity: i32) -> Result<u64> {
        if self.fail_increments.load(Ordering::SeqCst) {
            bail!("stock store unavailable");
        }
        let mut products = locked(&self.products);
        match products.get_mut(&product_id) {
            Some((_, stock)) => {
                *stock += quantity;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_product(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>> {
        Ok(locked(&self.products)
            .get(&product_id)
            .map(|(product, _)| product.clone()))
    }
}

// ============================================================================
// Order repository
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    orders: Arc<Mutex<HashMap<Uuid, Order>>>,
    fail_next_commit: Arc<AtomicBool>,
    open_transactions: Arc<AtomicUsize>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already-committed order, e.g. one created long ago.
    pub fn insert(&self, order: Order) {
        locked(&self.orders).insert(order.id, order);
    }

    pub fn len(&self) -> usize {
        locked(&self.orders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The next staged transaction fails on commit.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Staged transactions not yet committed or rolled back.
    pub fn open_transactions(&self) -> usize {
        self.open_transactions.load(Ordering::SeqCst)
    }
}

struct MemoryOrderTransaction {
    orders: Arc<Mutex<HashMap<Uuid, Order>>>,
    fail_next_commit: Arc<AtomicBool>,
    open_transactions: Arc<AtomicUsize>,
    order: Order,
}

#[async_trait]
impl OrderTransaction for MemoryOrderTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.open_transactions.fetch_sub(1, Ordering::SeqCst);
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            bail!("commit failed for order {}", self.order.order_no);
        }

        let mut orders = locked(&self.orders);
        if orders.values().any(|o| o.order_no == self.order.order_no) {
            bail!("duplicate order_no {}", self.order.order_no);
        }
        orders.insert(self.order.id, self.order);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.open_transactions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn stage(&self, order: &Order) -> Result<Box<dyn OrderTransaction>> {
        self.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryOrderTransaction {
            orders: self.orders.clone(),
            fail_next_commit: self.fail_next_commit.clone(),
            open_transactions: self.open_transactions.clone(),
            order: order.clone(),
        }))
    }

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(locked(&self.orders).get(&order_id).cloned())
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        Ok(locked(&self.orders)
            .values()
            .find(|o| o.order_no == order_no)
            .cloned())
    }

    async fn find_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = locked(&self.orders)
            .values()
            .filter(|o| o.buyer_id == buyer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut orders = locked(&self.orders);
        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if order.status != from {
            return Ok(false);
        }

        match to {
            OrderStatus::Paid => order.paid_at = Some(at),
            OrderStatus::Shipped => order.shipped_at = Some(at),
            OrderStatus::Completed => order.finished_at = Some(at),
            OrderStatus::PendingPayment | OrderStatus::Cancelled => {}
        }
        order.status = to;
        order.updated_at = at;
        Ok(true)
    }

    async fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>> {
        let mut stale: Vec<Order> = locked(&self.orders)
            .values()
            .filter(|o| o.status == OrderStatus::PendingPayment && o.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}

// ============================================================================
// Coupon service
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCouponService {
    coupons: Mutex<HashMap<Uuid, CouponSnapshot>>,
    redemptions: Mutex<HashMap<Uuid, Uuid>>,
    fail_mark_used: AtomicBool,
}

impl MemoryCouponService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_coupon(&self, coupon: CouponSnapshot) {
        locked(&self.coupons).insert(coupon.id, coupon);
    }

    pub fn coupon(&self, user_coupon_id: Uuid) -> Option<CouponSnapshot> {
        locked(&self.coupons).get(&user_coupon_id).cloned()
    }

    /// Order that redeemed the coupon, if any.
    pub fn redeemed_by(&self, user_coupon_id: Uuid) -> Option<Uuid> {
        locked(&self.redemptions).get(&user_coupon_id).copied()
    }

    pub fn fail_mark_used(&self, fail: bool) {
        self.fail_mark_used.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CouponService for MemoryCouponService {
    async fn find_user_coupon(&self, user_coupon_id: Uuid) -> Result<Option<CouponSnapshot>> {
        Ok(self.coupon(user_coupon_id))
    }

    fn calculate_discount(
        &self,
        coupon: &CouponSnapshot,
        amount: Decimal,
    ) -> std::result::Result<Decimal, CouponError> {
        coupon::calculate_discount(coupon, amount)
    }

    async fn mark_used(&self, user_coupon_id: Uuid, order_id: Uuid) -> Result<()> {
        if self.fail_mark_used.load(Ordering::SeqCst) {
            bail!("coupon service unavailable");
        }

        let mut coupons = locked(&self.coupons);
        let coupon = coupons
            .get_mut(&user_coupon_id)
            .ok_or_else(|| anyhow!("unknown coupon {user_coupon_id}"))?;
        if coupon.status != CouponStatus::Unused {
            bail!("coupon {user_coupon_id} is not unused");
        }
        coupon.status = CouponStatus::Used;
        locked(&self.redemptions).insert(user_coupon_id, order_id);
        Ok(())
    }
}
