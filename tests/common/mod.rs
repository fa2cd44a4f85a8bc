#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use shop_orders::domain::order::{generate_order_no, Order, OrderLine, OrderStatus, ReceiverInfo};
use shop_orders::domain::stock::ProductSnapshot;
use shop_orders::messaging::RecordingNotifier;
use shop_orders::metrics::Metrics;
use shop_orders::store::{
    MemoryCouponService, MemoryKvStore, MemoryOrderRepository, MemoryStockRepository, OrderRepository,
};
use shop_orders::utils::RetryConfig;
use shop_orders::{Backends, ServiceConfig, Services};

/// Full service stack over in-memory stores.
pub struct Harness {
    pub kv: Arc<MemoryKvStore>,
    pub stock: Arc<MemoryStockRepository>,
    pub orders: Arc<MemoryOrderRepository>,
    pub coupons: Arc<MemoryCouponService>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

/// Production defaults with short polling and backoff so tests stay fast.
pub fn fast_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.lock.retry_interval = Duration::from_millis(2);
    config.order.restore_retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    };
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        Self::with_order_store(config, |orders| orders as Arc<dyn OrderRepository>)
    }

    /// Services see the order store through `wrap`; `self.orders` stays the
    /// underlying memory repository.
    pub fn with_order_store<F>(config: ServiceConfig, wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryOrderRepository>) -> Arc<dyn OrderRepository>,
    {
        let kv = Arc::new(MemoryKvStore::new());
        let stock = Arc::new(MemoryStockRepository::new());
        let orders = Arc::new(MemoryOrderRepository::new());
        let coupons = Arc::new(MemoryCouponService::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(Metrics::new().expect("metrics registry"));

        let services = Services::build(
            Backends {
                kv: kv.clone(),
                stock: stock.clone(),
                orders: wrap(orders.clone()),
                coupons: coupons.clone(),
                notifier: notifier.clone(),
            },
            config,
            metrics,
        );

        Self {
            kv,
            stock,
            orders,
            coupons,
            notifier,
            services,
        }
    }

    pub fn add_product(&self, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.stock.add_product(
            ProductSnapshot {
                id,
                name: format!("product-{}", &id.to_string()[..8]),
                price,
                on_sale: true,
            },
            stock,
        );
        id
    }

    /// Insert a pending order directly, as if created at `created_at`, and
    /// take its stock like checkout would have.
    pub fn seed_pending_order(&self, buyer_id: Uuid, lines: &[(Uuid, i32)], created_at: DateTime<Utc>) -> Order {
        let lines: Vec<OrderLine> = lines
            .iter()
            .map(|(product_id, quantity)| {
                let before = self.stock.stock_of(*product_id).expect("seeded product");
                self.stock.set_stock(*product_id, before - quantity);
                OrderLine {
                    product_id: *product_id,
                    product_name: "seeded".to_string(),
                    quantity: *quantity,
                    unit_price: Decimal::new(1000, 2),
                }
            })
            .collect();
        let total: Decimal = lines.iter().map(OrderLine::subtotal).sum();

        let order = Order {
            id: Uuid::new_v4(),
            order_no: generate_order_no(created_at),
            buyer_id,
            lines,
            status: OrderStatus::PendingPayment,
            coupon_id: None,
            original_amount: total,
            discount: Decimal::ZERO,
            payable_amount: total,
            receiver: receiver(),
            remark: None,
            created_at,
            paid_at: None,
            shipped_at: None,
            finished_at: None,
            updated_at: created_at,
        };
        self.orders.insert(order.clone());
        order
    }
}

pub fn receiver() -> ReceiverInfo {
    ReceiverInfo {
        name: "Li Lei".to_string(),
        phone: "13800000000".to_string(),
        address: "1 Market Street".to_string(),
    }
}

pub fn yuan(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
