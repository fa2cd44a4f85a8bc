use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::commands::CreateOrder;
use super::errors::OrderError;
use super::events::OrderEvent;
use super::value_objects::{CancelReason, Order, OrderAction, OrderLine, OrderStatus, PaymentWindow};
use crate::cache::CacheGuard;
use crate::domain::coupon::{self, CouponError};
use crate::domain::stock::{
    BatchFailure, BatchOutcome, ProductSnapshot, StockError, StockItem, StockLedger,
};
use crate::messaging::StatusNotifier;
use crate::metrics::Metrics;
use crate::store::{CouponService, OrderRepository, StockRepository};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Order Lifecycle - checkout, status transitions, cancellation
// ============================================================================
//
// Checkout:
//   validate -> price from catalog -> coupon
//   -> deduct stock (per product, in line order), put back the prefix on failure
//   -> write order rows in one transaction, put back all stock if that fails
//
// Timestamps are kept at microsecond precision, the resolution Postgres stores.
//
// Transitions are compare-and-set on the status column, so two racing
// callers cannot both move the same order (e.g. pay vs. timeout-cancel).
// Cancel puts the stock back after the status change, never before.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct OrderConfig {
    /// Unpaid orders older than this are cancelled by the sweeper.
    pub payment_timeout: Duration,
    pub order_cache_ttl: Duration,
    pub product_cache_ttl: Duration,
    pub restore_retry: RetryConfig,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(15 * 60),
            order_cache_ttl: Duration::from_secs(15 * 60),
            product_cache_ttl: Duration::from_secs(30 * 60),
            restore_retry: RetryConfig::stock_restore(),
        }
    }
}

/// Store handles the lifecycle works against.
#[derive(Clone)]
pub struct OrderPorts {
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn StockRepository>,
    pub coupons: Arc<dyn CouponService>,
    pub notifier: Arc<dyn StatusNotifier>,
}

#[derive(Clone)]
pub struct OrderLifecycle {
    ports: OrderPorts,
    stock: StockLedger,
    cache: CacheGuard,
    config: OrderConfig,
    metrics: Arc<Metrics>,
}

/// `ORD` + UTC timestamp to the millisecond + 6 random hex chars.
pub fn generate_order_no(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD{}{}", now.format("%Y%m%d%H%M%S%3f"), &suffix[..6])
}

fn order_key(order_id: Uuid) -> String {
    format!("order:{order_id}")
}

fn order_list_key(buyer_id: Uuid) -> String {
    format!("order_list:{buyer_id}")
}

fn product_key(product_id: Uuid) -> String {
    format!("product:{product_id}")
}

fn failure_reason(err: &OrderError) -> &'static str {
    match err {
        OrderError::EmptyLines | OrderError::InvalidQuantity { .. } => "invalid_request",
        OrderError::ProductUnavailable(_) => "product_unavailable",
        OrderError::InsufficientStock { .. } => "insufficient_stock",
        OrderError::Coupon(_) => "coupon",
        OrderError::Busy(_) => "busy",
        _ => "internal",
    }
}

/// `StockError` is not `Clone`; rebuild the order-level error from a borrow.
fn from_batch_error(err: &StockError) -> OrderError {
    match err {
        StockError::Busy { .. } => OrderError::Busy(err.to_string()),
        StockError::InvalidQuantity { product_id, quantity } => OrderError::InvalidQuantity {
            product_id: *product_id,
            quantity: *quantity,
        },
        StockError::ProductNotFound(id) => OrderError::ProductUnavailable(*id),
        StockError::Internal(e) => OrderError::Internal(anyhow::anyhow!("stock deduction failed: {e}")),
    }
}

fn window_at(order: &Order, timeout: Duration, now: DateTime<Utc>) -> PaymentWindow {
    if order.status != OrderStatus::PendingPayment {
        return PaymentWindow::NotPayable;
    }
    let elapsed = (now - order.created_at).to_std().unwrap_or(Duration::ZERO);
    match timeout.checked_sub(elapsed) {
        Some(remaining) if !remaining.is_zero() => PaymentWindow::Remaining(remaining),
        _ => PaymentWindow::Expired,
    }
}

impl OrderLifecycle {
    pub fn new(
        ports: OrderPorts,
        stock: StockLedger,
        cache: CacheGuard,
        config: OrderConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ports,
            stock,
            cache,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    pub async fn create(&self, cmd: CreateOrder) -> Result<Order, OrderError> {
        let buyer_id = cmd.buyer_id;
        let result = self.try_create(cmd).await;

        if let Err(e) = &result {
            self.metrics.record_order_create_failure(failure_reason(e));
            if e.is_business() {
                tracing::info!(buyer_id = %buyer_id, reason = %e, "Order rejected");
            } else {
                tracing::warn!(buyer_id = %buyer_id, error = %e, "Order creation failed");
            }
        }

        result
    }

    async fn try_create(&self, cmd: CreateOrder) -> Result<Order, OrderError> {
        if cmd.lines.is_empty() {
            return Err(OrderError::EmptyLines);
        }
        if let Some(bad) = cmd.lines.iter().find(|l| l.quantity <= 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: bad.product_id,
                quantity: bad.quantity,
            });
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        for request in &cmd.lines {
            let product = self
                .product(request.product_id)
                .await?
                .filter(|p| p.on_sale)
                .ok_or(OrderError::ProductUnavailable(request.product_id))?;
            lines.push(OrderLine {
                product_id: product.id,
                product_name: product.name,
                quantity: request.quantity,
                unit_price: product.price,
            });
        }

        let now = Utc::now().trunc_subsecs(6);
        let original_amount: Decimal = lines.iter().map(OrderLine::subtotal).sum();
        let discount = match cmd.coupon_id {
            Some(coupon_id) => self.discount_for(coupon_id, cmd.buyer_id, original_amount, now).await?,
            None => Decimal::ZERO,
        };

        let order = Order {
            id: Uuid::now_v7(),
            order_no: generate_order_no(now),
            buyer_id: cmd.buyer_id,
            lines,
            status: OrderStatus::PendingPayment,
            coupon_id: cmd.coupon_id,
            original_amount,
            discount,
            payable_amount: original_amount - discount,
            receiver: cmd.receiver,
            remark: cmd.remark,
            created_at: now,
            paid_at: None,
            shipped_at: None,
            finished_at: None,
            updated_at: now,
        };

        let items: Vec<StockItem> = order
            .lines
            .iter()
            .map(|l| StockItem::new(l.product_id, l.quantity))
            .collect();

        // Stock first: no order transaction is open while waiting on stock locks.
        let outcome = self.stock.batch_deduct(&items).await;
        if let BatchOutcome::PartialFailure { failed_index, cause } = &outcome {
            let applied = outcome.applied(&items);
            if !applied.is_empty() {
                tracing::warn!(
                    order_no = %order.order_no,
                    failed_index = *failed_index,
                    "Checkout stopped mid-batch, restoring deducted stock"
                );
                self.stock.compensate(applied).await;
            }
            return Err(match cause {
                BatchFailure::InsufficientStock { product_id } => OrderError::InsufficientStock {
                    product_id: *product_id,
                },
                BatchFailure::Error(e) => from_batch_error(e),
            });
        }

        if let Err(e) = self.persist(&order).await {
            tracing::error!(order_no = %order.order_no, error = %e, "Order write failed after stock deduction");
            self.stock.compensate(&items).await;
            return Err(OrderError::Internal(e));
        }

        if let Some(coupon_id) = order.coupon_id {
            if let Err(e) = self.ports.coupons.mark_used(coupon_id, order.id).await {
                // Order stands; the coupon needs a manual mark.
                tracing::error!(
                    order_no = %order.order_no,
                    coupon_id = %coupon_id,
                    error = %e,
                    "Failed to mark coupon used for committed order"
                );
            }
        }

        self.invalidate(&[order_list_key(order.buyer_id)]).await;
        self.publish(OrderEvent::for_status(&order, None));

        tracing::info!(
            order_no = %order.order_no,
            order_id = %order.id,
            buyer_id = %order.buyer_id,
            payable = %order.payable_amount,
            lines = order.lines.len(),
            "🛒 Order created"
        );

        Ok(order)
    }

    /// Header and lines in one short transaction.
    async fn persist(&self, order: &Order) -> anyhow::Result<()> {
        let tx = self.ports.orders.stage(order).await?;
        tx.commit().await.context("order commit failed")
    }

    async fn product(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>, OrderError> {
        let products = self.ports.products.clone();
        let product = self
            .cache
            .read_through(&product_key(product_id), self.config.product_cache_ttl, || async move {
                products.find_product(product_id).await
            })
            .await?;
        Ok(product)
    }

    async fn discount_for(
        &self,
        coupon_id: Uuid,
        buyer_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, OrderError> {
        let coupon = self
            .ports
            .coupons
            .find_user_coupon(coupon_id)
            .await?
            .ok_or(CouponError::NotFound(coupon_id))?;

        coupon::validate_for_order(&coupon, buyer_id, amount, now)?;
        let discount = self.ports.coupons.calculate_discount(&coupon, amount)?;
        coupon::ensure_payable(discount, amount)?;

        tracing::debug!(coupon_id = %coupon_id, discount = %discount, "Coupon applied");
        Ok(discount)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub async fn pay(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.transition(order_id, OrderAction::Pay, None).await
    }

    pub async fn ship(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.transition(order_id, OrderAction::Ship, None).await
    }

    pub async fn complete(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.transition(order_id, OrderAction::Complete, None).await
    }

    /// Buyer-initiated cancel of an unpaid order.
    pub async fn cancel(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.cancel_with_reason(order_id, CancelReason::Buyer).await
    }

    /// Cancel, then return every line to stock.
    ///
    /// Only the caller that wins the status change restores stock, so stock
    /// is restored at most once per order. If some lines cannot be restored
    /// the order still ends up Cancelled and `StockRestoreIncomplete` lists
    /// the products that need a manual correction.
    pub async fn cancel_with_reason(&self, order_id: Uuid, reason: CancelReason) -> Result<Order, OrderError> {
        let order = self.transition(order_id, OrderAction::Cancel, Some(reason)).await?;
        self.restore_stock(&order).await?;
        Ok(order)
    }

    async fn transition(
        &self,
        order_id: Uuid,
        action: OrderAction,
        reason: Option<CancelReason>,
    ) -> Result<Order, OrderError> {
        let mut order = self
            .ports
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        let from = order.status;
        let now = Utc::now().trunc_subsecs(6);
        let to = order.apply(action, now)?;

        if !self.ports.orders.update_status(order_id, from, to, now).await? {
            // Someone else moved it first; report what it is now.
            let current = self
                .ports
                .orders
                .find_by_id(order_id)
                .await?
                .map(|o| o.status)
                .unwrap_or(from);
            tracing::info!(
                order_id = %order_id,
                action = %action,
                status = %current,
                "Order transition lost a concurrent update"
            );
            return Err(OrderError::InvalidState {
                order_id,
                status: current,
                action,
            });
        }

        self.metrics.record_order_transition(&from.to_string(), &to.to_string());
        self.invalidate(&[order_key(order_id), order_list_key(order.buyer_id)]).await;
        self.publish(OrderEvent::for_status(&order, reason));

        tracing::info!(
            order_no = %order.order_no,
            order_id = %order_id,
            from = %from,
            to = %to,
            "✅ Order status changed"
        );

        Ok(order)
    }

    async fn restore_stock(&self, order: &Order) -> Result<(), OrderError> {
        let mut unrestored = Vec::new();

        for line in &order.lines {
            let restored = retry_on_transient(
                &self.config.restore_retry,
                "stock_restore",
                Some(&self.metrics),
                |_attempt| self.stock.increase(line.product_id, line.quantity),
            )
            .await
            .into_result();

            if let Err(e) = restored {
                self.metrics.record_compensation_failure();
                tracing::error!(
                    order_no = %order.order_no,
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    "Stock restore failed for cancelled order, manual correction required"
                );
                unrestored.push(line.product_id);
            }
        }

        if unrestored.is_empty() {
            Ok(())
        } else {
            Err(OrderError::StockRestoreIncomplete {
                order_id: order.id,
                products: unrestored,
            })
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let orders = self.ports.orders.clone();
        self.cache
            .read_through(&order_key(order_id), self.config.order_cache_ttl, || async move {
                orders.find_by_id(order_id).await
            })
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Lookup by the human-facing order number. Not cached.
    pub async fn get_order_by_no(&self, order_no: &str) -> Result<Option<Order>, OrderError> {
        Ok(self.ports.orders.find_by_order_no(order_no).await?)
    }

    /// The buyer's orders, newest first.
    pub async fn list_orders(&self, buyer_id: Uuid) -> Result<Vec<Order>, OrderError> {
        let orders = self.ports.orders.clone();
        let list = self
            .cache
            .read_through(&order_list_key(buyer_id), self.config.order_cache_ttl, || async move {
                Ok(Some(orders.find_by_buyer(buyer_id).await?))
            })
            .await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn payment_window(&self, order_id: Uuid) -> Result<PaymentWindow, OrderError> {
        let order = self
            .ports
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        Ok(window_at(&order, self.config.payment_timeout, Utc::now()))
    }

    // ========================================================================
    // Side effects
    // ========================================================================

    async fn invalidate(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.cache.invalidate(key).await {
                tracing::warn!(cache_key = %key, error = %e, "Failed to invalidate order cache");
            }
        }
    }

    fn publish(&self, event: OrderEvent) {
        let notifier = self.ports.notifier.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let event_type = event.event_type();
            match notifier.notify(&event).await {
                Ok(()) => metrics.record_notification(event_type, true),
                Err(e) => {
                    metrics.record_notification(event_type, false);
                    tracing::warn!(
                        event_type = event_type,
                        order_id = %event.data().order_id,
                        error = %e,
                        "Order notification failed"
                    );
                }
            }
        });
    }
}
