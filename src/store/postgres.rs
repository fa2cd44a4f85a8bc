// ============================================================================
// Postgres Store - stock, orders and coupons over sqlx
// ============================================================================
//
// Stock writes are single conditional statements; the affected-row count is
// the answer (0 = not enough stock / unknown product). Order status changes
// are compare-and-set on `status`. Order creation stages header + lines in a
// transaction that the lifecycle commits only after stock was deducted.
//
// Schema: migrations/0001_init.sql
//
// ============================================================================

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{CouponService, OrderRepository, OrderTransaction, StockRepository};
use crate::domain::coupon::{self, CouponError, CouponKind, CouponSnapshot, CouponStatus};
use crate::domain::order::{Order, OrderLine, OrderStatus, ReceiverInfo};
use crate::domain::stock::ProductSnapshot;

const ORDER_COLUMNS: &str = "id, order_no, buyer_id, status, coupon_id, original_amount, discount, \
     payable_amount, receiver_name, receiver_phone, receiver_address, remark, created_at, paid_at, \
     shipped_at, finished_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Migration failed")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attach lines to headers, preserving header order.
    async fn with_lines(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?;

        let line_rows = sqlx::query(
            "SELECT order_id, product_id, product_name, quantity, unit_price \
             FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, line_no",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load order lines")?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &line_rows {
            lines
                .entry(row.try_get("order_id")?)
                .or_default()
                .push(OrderLine {
                    product_id: row.try_get("product_id")?,
                    product_name: row.try_get("product_name")?,
                    quantity: row.try_get("quantity")?,
                    unit_price: row.try_get("unit_price")?,
                });
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                order_from_row(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

fn order_from_row(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    let code: i16 = row.try_get("status")?;
    let status = OrderStatus::from_code(code).ok_or_else(|| anyhow!("unknown order status code {code}"))?;

    Ok(Order {
        id: row.try_get("id")?,
        order_no: row.try_get("order_no")?,
        buyer_id: row.try_get("buyer_id")?,
        lines,
        status,
        coupon_id: row.try_get("coupon_id")?,
        original_amount: row.try_get("original_amount")?,
        discount: row.try_get("discount")?,
        payable_amount: row.try_get("payable_amount")?,
        receiver: ReceiverInfo {
            name: row.try_get("receiver_name")?,
            phone: row.try_get("receiver_phone")?,
            address: row.try_get("receiver_address")?,
        },
        remark: row.try_get("remark")?,
        created_at: row.try_get("created_at")?,
        paid_at: row.try_get("paid_at")?,
        shipped_at: row.try_get("shipped_at")?,
        finished_at: row.try_get("finished_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// Stock
// ============================================================================

#[async_trait]
impl StockRepository for PgStore {
    async fn find_stock(&self, product_id: Uuid) -> Result<Option<i32>> {
        let stock = sqlx::query_scalar::<_, i32>("SELECT stock FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read stock")?;
        Ok(stock)
    }

    async fn decrement_if_available(&self, product_id: Uuid, quantity: i32) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW() \
             WHERE id = $1 AND stock >= $2",
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .context("Failed to decrement stock")?;
        Ok(result.rows_affected())
    }

    async fn increment(&self, product_id: Uuid, quantity: i32) -> Result<u64> {
        let result = sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(product_id)
            .bind(quantity)
            .execute(&self.pool)
            .await
            .context("Failed to increment stock")?;
        Ok(result.rows_affected())
    }

    async fn find_product(&self, product_id: Uuid) -> Result<Option<ProductSnapshot>> {
        let row = sqlx::query("SELECT id, name, price, on_sale FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read product")?;

        row.map(|row| {
            Ok(ProductSnapshot {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                price: row.try_get("price")?,
                on_sale: row.try_get("on_sale")?,
            })
        })
        .transpose()
    }
}

// ============================================================================
// Orders
// ============================================================================

struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit order")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back order")
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn stage(&self, order: &Order) -> Result<Box<dyn OrderTransaction>> {
        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(order.id)
        .bind(&order.order_no)
        .bind(order.buyer_id)
        .bind(order.status.code())
        .bind(order.coupon_id)
        .bind(order.original_amount)
        .bind(order.discount)
        .bind(order.payable_amount)
        .bind(&order.receiver.name)
        .bind(&order.receiver.phone)
        .bind(&order.receiver.address)
        .bind(&order.remark)
        .bind(order.created_at)
        .bind(order.paid_at)
        .bind(order.shipped_at)
        .bind(order.finished_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert order")?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_id, line_no, product_id, product_name, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(order.id)
            .bind(i32::try_from(line_no)?)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await
            .context("Failed to insert order line")?;
        }

        Ok(Box::new(PgOrderTransaction { tx }))
    }

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load order")?;
        Ok(self.with_lines(rows).await?.pop())
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1"))
            .bind(order_no)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load order")?;
        Ok(self.with_lines(rows).await?.pop())
    }

    async fn find_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE buyer_id = $1 ORDER BY created_at DESC"
        ))
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list orders")?;
        self.with_lines(rows).await
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4, \
                 paid_at     = CASE WHEN $3 = 1 THEN $4 ELSE paid_at END, \
                 shipped_at  = CASE WHEN $3 = 2 THEN $4 ELSE shipped_at END, \
                 finished_at = CASE WHEN $3 = 3 THEN $4 ELSE finished_at END \
             WHERE id = $1 AND status = $2",
        )
        .bind(order_id)
        .bind(from.code())
        .bind(to.code())
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to update order status")?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = $1 AND created_at < $2 ORDER BY created_at LIMIT $3"
        ))
        .bind(OrderStatus::PendingPayment.code())
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan stale orders")?;
        self.with_lines(rows).await
    }
}

// ============================================================================
// Coupons
// ============================================================================

fn coupon_kind(row: &PgRow) -> Result<CouponKind> {
    let code: i16 = row.try_get("kind")?;
    let kind = match code {
        1 => CouponKind::FlatAmount {
            amount: row
                .try_get::<Option<Decimal>, _>("amount")?
                .ok_or_else(|| anyhow!("flat coupon without amount"))?,
        },
        2 => CouponKind::Percentage {
            rate: row
                .try_get::<Option<Decimal>, _>("rate")?
                .ok_or_else(|| anyhow!("percentage coupon without rate"))?,
            max_discount: row.try_get("max_discount")?,
        },
        3 => CouponKind::FreeShipping,
        other => bail!("unknown coupon kind {other}"),
    };
    Ok(kind)
}

#[async_trait]
impl CouponService for PgStore {
    async fn find_user_coupon(&self, user_coupon_id: Uuid) -> Result<Option<CouponSnapshot>> {
        let row = sqlx::query(
            "SELECT uc.id, uc.user_id, uc.status, c.name, c.kind, c.amount, c.rate, \
                    c.max_discount, c.min_amount, c.valid_from, c.valid_until \
             FROM user_coupons uc JOIN coupons c ON c.id = uc.coupon_id \
             WHERE uc.id = $1",
        )
        .bind(user_coupon_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load coupon")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_code: i16 = row.try_get("status")?;
        Ok(Some(CouponSnapshot {
            id: row.try_get("id")?,
            owner_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            kind: coupon_kind(&row)?,
            min_amount: row.try_get("min_amount")?,
            valid_from: row.try_get("valid_from")?,
            valid_until: row.try_get("valid_until")?,
            status: CouponStatus::from_code(status_code)
                .ok_or_else(|| anyhow!("unknown coupon status {status_code}"))?,
        }))
    }

    fn calculate_discount(
        &self,
        coupon: &CouponSnapshot,
        amount: Decimal,
    ) -> std::result::Result<Decimal, CouponError> {
        coupon::calculate_discount(coupon, amount)
    }

    async fn mark_used(&self, user_coupon_id: Uuid, order_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_coupons SET status = $3, order_id = $2, used_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(user_coupon_id)
        .bind(order_id)
        .bind(CouponStatus::Used.code())
        .bind(CouponStatus::Unused.code())
        .execute(&self.pool)
        .await
        .context("Failed to mark coupon used")?;

        if result.rows_affected() == 0 {
            bail!("coupon {user_coupon_id} was not unused");
        }
        Ok(())
    }
}
