use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::errors::StockError;
use super::value_objects::{BatchFailure, BatchOutcome, CompensationReport, DeductOutcome, StockItem};
use crate::cache::{CacheError, CacheGuard};
use crate::lock::{DistributedLock, GuardedError};
use crate::metrics::Metrics;
use crate::store::StockRepository;

// ============================================================================
// Stock Ledger - the only writer of product stock
// ============================================================================
//
// Every mutation of a product's stock happens under that product's lease
// (`stock_lock:{product_id}`) and is a single conditional statement in the
// durable store, so stock can never go below zero even if a lease expires
// mid-operation. Reads go through the cache; writes invalidate it.
//
// Multi-product batches are NOT atomic. See `batch_deduct`.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct StockConfig {
    pub lock_wait: Duration,
    pub lock_lease: Duration,
    pub cache_ttl: Duration,
    pub lock_prefix: String,
    pub cache_prefix: String,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            lock_lease: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60),
            lock_prefix: "stock_lock:".to_string(),
            cache_prefix: "stock_cache:".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct StockLedger {
    repository: Arc<dyn StockRepository>,
    lock: DistributedLock,
    cache: CacheGuard,
    config: StockConfig,
    metrics: Arc<Metrics>,
}

impl StockLedger {
    pub fn new(
        repository: Arc<dyn StockRepository>,
        lock: DistributedLock,
        cache: CacheGuard,
        config: StockConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            lock,
            cache,
            config,
            metrics,
        }
    }

    fn lock_key(&self, product_id: Uuid) -> String {
        format!("{}{}", self.config.lock_prefix, product_id)
    }

    fn cache_key(&self, product_id: Uuid) -> String {
        format!("{}{}", self.config.cache_prefix, product_id)
    }

    fn map_guarded(&self, product_id: Uuid, err: GuardedError<StockError>) -> StockError {
        match err {
            GuardedError::Contention { .. } => StockError::Busy { product_id },
            GuardedError::Store(e) => StockError::Internal(e),
            GuardedError::Body(e) => e,
        }
    }

    /// Cached read of available stock. `None` for unknown products.
    ///
    /// May lag the durable value by up to the cache TTL only if an
    /// invalidation was lost; writers always invalidate.
    pub async fn get_available(&self, product_id: Uuid) -> Result<Option<i32>, StockError> {
        let repository = self.repository.clone();
        self.cache
            .read_through(&self.cache_key(product_id), self.config.cache_ttl, || async move {
                repository.find_stock(product_id).await
            })
            .await
            .map_err(|e| match e {
                CacheError::Busy { .. } => StockError::Busy { product_id },
                CacheError::Loader { source, .. } => StockError::Internal(source),
                CacheError::Store(e) => StockError::Internal(e),
            })
    }

    /// Take `quantity` units if available. Not having enough stock is a
    /// normal outcome, not an error.
    pub async fn deduct(&self, product_id: Uuid, quantity: i32) -> Result<DeductOutcome, StockError> {
        if quantity <= 0 {
            return Err(StockError::InvalidQuantity { product_id, quantity });
        }

        let repository = self.repository.clone();
        let result = self
            .lock
            .execute_guarded(
                &self.lock_key(product_id),
                self.config.lock_lease,
                self.config.lock_wait,
                || async move {
                    let affected = repository.decrement_if_available(product_id, quantity).await?;
                    if affected == 0 {
                        return Ok(DeductOutcome::InsufficientStock);
                    }
                    self.invalidate_cache(product_id).await;
                    Ok::<_, StockError>(DeductOutcome::Deducted)
                },
            )
            .await
            .map_err(|e| self.map_guarded(product_id, e));

        match &result {
            Ok(DeductOutcome::Deducted) => {
                self.metrics.record_stock_operation("deduct", "deducted");
                tracing::debug!(product_id = %product_id, quantity = quantity, "Stock deducted");
            }
            Ok(DeductOutcome::InsufficientStock) => {
                self.metrics.record_stock_operation("deduct", "insufficient");
                tracing::info!(product_id = %product_id, quantity = quantity, "Insufficient stock");
            }
            Err(e) => {
                self.metrics.record_stock_operation("deduct", outcome_label(e));
                tracing::warn!(product_id = %product_id, quantity = quantity, error = %e, "Stock deduct failed");
            }
        }

        result
    }

    /// Put `quantity` units back. Unknown products are an error.
    pub async fn increase(&self, product_id: Uuid, quantity: i32) -> Result<(), StockError> {
        if quantity <= 0 {
            return Err(StockError::InvalidQuantity { product_id, quantity });
        }

        let repository = self.repository.clone();
        let result = self
            .lock
            .execute_guarded(
                &self.lock_key(product_id),
                self.config.lock_lease,
                self.config.lock_wait,
                || async move {
                    let affected = repository.increment(product_id, quantity).await?;
                    if affected == 0 {
                        return Err(StockError::ProductNotFound(product_id));
                    }
                    self.invalidate_cache(product_id).await;
                    Ok::<_, StockError>(())
                },
            )
            .await
            .map_err(|e| self.map_guarded(product_id, e));

        match &result {
            Ok(()) => {
                self.metrics.record_stock_operation("increase", "ok");
                tracing::debug!(product_id = %product_id, quantity = quantity, "Stock increased");
            }
            Err(e) => {
                self.metrics.record_stock_operation("increase", outcome_label(e));
                tracing::warn!(product_id = %product_id, quantity = quantity, error = %e, "Stock increase failed");
            }
        }

        result
    }

    /// Deduct each item in input order, each under its own product lock.
    ///
    /// Stops at the first item that cannot be deducted. Items before
    /// `failed_index` remain deducted; callers must `compensate` them
    /// (use `BatchOutcome::applied`).
    pub async fn batch_deduct(&self, items: &[StockItem]) -> BatchOutcome {
        for (index, item) in items.iter().enumerate() {
            let cause = match self.deduct(item.product_id, item.quantity).await {
                Ok(DeductOutcome::Deducted) => continue,
                Ok(DeductOutcome::InsufficientStock) => BatchFailure::InsufficientStock {
                    product_id: item.product_id,
                },
                Err(e) => BatchFailure::Error(e),
            };

            if index > 0 {
                tracing::warn!(
                    failed_index = index,
                    product_id = %item.product_id,
                    "Batch deduct stopped after partial application"
                );
            }
            return BatchOutcome::PartialFailure {
                failed_index: index,
                cause,
            };
        }

        BatchOutcome::Success
    }

    /// Restore previously deducted items. Every failure is logged and
    /// reported, none is swallowed.
    pub async fn compensate(&self, applied: &[StockItem]) -> CompensationReport {
        let mut report = CompensationReport::default();

        for item in applied {
            match self.increase(item.product_id, item.quantity).await {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    self.metrics.record_compensation_failure();
                    tracing::error!(
                        product_id = %item.product_id,
                        quantity = item.quantity,
                        error = %e,
                        "Stock compensation failed, manual correction required"
                    );
                    report.failed.push(*item);
                }
            }
        }

        if !applied.is_empty() {
            tracing::info!(
                restored = report.restored,
                failed = report.failed.len(),
                "Stock compensation finished"
            );
        }

        report
    }

    async fn invalidate_cache(&self, product_id: Uuid) {
        // The durable write already happened; a stale entry lives at most one TTL.
        if let Err(e) = self.cache.invalidate(&self.cache_key(product_id)).await {
            tracing::warn!(product_id = %product_id, error = %e, "Failed to invalidate stock cache");
        }
    }
}

fn outcome_label(err: &StockError) -> &'static str {
    match err {
        StockError::Busy { .. } => "busy",
        StockError::InvalidQuantity { .. } => "invalid",
        StockError::ProductNotFound(_) => "not_found",
        StockError::Internal(_) => "error",
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::domain::stock::ProductSnapshot;
    use crate::lock::LockConfig;
    use crate::store::{KvStore, MemoryKvStore, MemoryStockRepository};
    use rust_decimal::Decimal;

    struct Fixture {
        kv: Arc<MemoryKvStore>,
        repo: Arc<MemoryStockRepository>,
        ledger: StockLedger,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKvStore::new());
        let repo = Arc::new(MemoryStockRepository::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let lock = DistributedLock::new(
            kv.clone(),
            LockConfig {
                retry_interval: Duration::from_millis(2),
                ..LockConfig::default()
            },
            metrics.clone(),
        );
        let cache = CacheGuard::new(kv.clone(), lock.clone(), CacheConfig::default(), metrics.clone());
        let ledger = StockLedger::new(repo.clone(), lock, cache, StockConfig::default(), metrics);
        Fixture { kv, repo, ledger }
    }

    fn product(repo: &MemoryStockRepository, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        repo.add_product(
            ProductSnapshot {
                id,
                name: format!("product-{id}"),
                price: Decimal::new(1000, 2),
                on_sale: true,
            },
            stock,
        );
        id
    }

    #[tokio::test]
    async fn test_deduct_and_insufficient() {
        let f = fixture();
        let id = product(&f.repo, 10);

        assert_eq!(f.ledger.deduct(id, 6).await.unwrap(), DeductOutcome::Deducted);
        assert_eq!(f.ledger.deduct(id, 6).await.unwrap(), DeductOutcome::InsufficientStock);
        assert_eq!(f.repo.stock_of(id), Some(4));
    }

    #[tokio::test]
    async fn test_non_positive_quantity_rejected() {
        let f = fixture();
        let id = product(&f.repo, 10);

        assert!(matches!(
            f.ledger.deduct(id, 0).await,
            Err(StockError::InvalidQuantity { quantity: 0, .. })
        ));
        assert!(matches!(
            f.ledger.increase(id, -1).await,
            Err(StockError::InvalidQuantity { quantity: -1, .. })
        ));
        assert_eq!(f.repo.stock_of(id), Some(10));
    }

    #[tokio::test]
    async fn test_increase_unknown_product() {
        let f = fixture();
        let missing = Uuid::new_v4();

        assert!(matches!(
            f.ledger.increase(missing, 1).await,
            Err(StockError::ProductNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_read_after_write_sees_new_value() {
        let f = fixture();
        let id = product(&f.repo, 10);

        assert_eq!(f.ledger.get_available(id).await.unwrap(), Some(10));
        f.ledger.deduct(id, 3).await.unwrap();
        assert_eq!(f.ledger.get_available(id).await.unwrap(), Some(7));
        f.ledger.increase(id, 1).await.unwrap();
        assert_eq!(f.ledger.get_available(id).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_unknown_product_reads_none() {
        let f = fixture();
        assert_eq!(f.ledger.get_available(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_busy_when_product_lock_held() {
        let f = fixture();
        let id = product(&f.repo, 10);
        let mut ledger = f.ledger.clone();
        ledger.config.lock_wait = Duration::from_millis(20);
        f.kv
            .set(&format!("lock:stock_lock:{id}"), "other-holder", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(matches!(ledger.deduct(id, 1).await, Err(StockError::Busy { .. })));
        assert_eq!(f.repo.stock_of(id), Some(10));
    }

    #[tokio::test]
    async fn test_batch_reports_failed_index_and_applied_prefix() {
        let f = fixture();
        let a = product(&f.repo, 5);
        let b = product(&f.repo, 1);
        let c = product(&f.repo, 5);
        let items = vec![StockItem::new(a, 2), StockItem::new(b, 2), StockItem::new(c, 2)];

        let outcome = f.ledger.batch_deduct(&items).await;

        assert!(matches!(
            outcome,
            BatchOutcome::PartialFailure {
                failed_index: 1,
                cause: BatchFailure::InsufficientStock { product_id }
            } if product_id == b
        ));
        assert_eq!(outcome.applied(&items), &items[..1]);
        assert_eq!(f.repo.stock_of(a), Some(3));
        assert_eq!(f.repo.stock_of(c), Some(5));
    }

    #[tokio::test]
    async fn test_compensate_reports_failures() {
        let f = fixture();
        let a = product(&f.repo, 5);
        let missing = Uuid::new_v4();

        let report = f
            .ledger
            .compensate(&[StockItem::new(a, 2), StockItem::new(missing, 1)])
            .await;

        assert_eq!(report.restored, 1);
        assert_eq!(report.failed, vec![StockItem::new(missing, 1)]);
        assert!(!report.is_complete());
        assert_eq!(f.repo.stock_of(a), Some(7));
    }
}
