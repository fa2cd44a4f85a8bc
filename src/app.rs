use std::sync::Arc;

use crate::cache::{CacheConfig, CacheGuard};
use crate::domain::order::{OrderConfig, OrderLifecycle, OrderPorts};
use crate::domain::stock::{StockConfig, StockLedger};
use crate::lock::{DistributedLock, LockConfig};
use crate::messaging::StatusNotifier;
use crate::metrics::Metrics;
use crate::store::{CouponService, KvStore, OrderRepository, StockRepository};
use crate::tasks::{SweeperConfig, TimeoutSweeper};

// ============================================================================
// Service wiring
// ============================================================================
//
// Builds every component from injected store handles. `main` passes the
// Redis/Postgres adapters; tests pass the in-memory ones.
//
// ============================================================================

/// Store handles and sinks the services are built on.
#[derive(Clone)]
pub struct Backends {
    pub kv: Arc<dyn KvStore>,
    pub stock: Arc<dyn StockRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub coupons: Arc<dyn CouponService>,
    pub notifier: Arc<dyn StatusNotifier>,
}

#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    pub lock: LockConfig,
    pub cache: CacheConfig,
    pub stock: StockConfig,
    pub order: OrderConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Clone)]
pub struct Services {
    pub lock: DistributedLock,
    pub cache: CacheGuard,
    pub stock: StockLedger,
    pub orders: OrderLifecycle,
    pub sweeper: TimeoutSweeper,
    pub metrics: Arc<Metrics>,
}

impl Services {
    pub fn build(backends: Backends, config: ServiceConfig, metrics: Arc<Metrics>) -> Self {
        let lock = DistributedLock::new(backends.kv.clone(), config.lock, metrics.clone());
        let cache = CacheGuard::new(backends.kv.clone(), lock.clone(), config.cache, metrics.clone());
        let stock = StockLedger::new(
            backends.stock.clone(),
            lock.clone(),
            cache.clone(),
            config.stock,
            metrics.clone(),
        );
        let orders = OrderLifecycle::new(
            OrderPorts {
                orders: backends.orders.clone(),
                products: backends.stock,
                coupons: backends.coupons,
                notifier: backends.notifier,
            },
            stock.clone(),
            cache.clone(),
            config.order,
            metrics.clone(),
        );
        let sweeper = TimeoutSweeper::new(
            backends.orders,
            orders.clone(),
            lock.clone(),
            config.sweeper,
            metrics.clone(),
        );

        Self {
            lock,
            cache,
            stock,
            orders,
            sweeper,
            metrics,
        }
    }
}
