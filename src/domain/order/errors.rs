use uuid::Uuid;

use super::value_objects::{OrderAction, OrderStatus};
use crate::cache::CacheError;
use crate::domain::coupon::CouponError;
use crate::domain::stock::StockError;
use crate::utils::IsTransient;

// ============================================================================
// Order Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid order state: cannot {action} order {order_id} in status {status}")]
    InvalidState {
        order_id: Uuid,
        status: OrderStatus,
        action: OrderAction,
    },

    #[error("Order must contain at least one line")]
    EmptyLines,

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: Uuid, quantity: i32 },

    #[error("Product {0} does not exist or is not on sale")]
    ProductUnavailable(Uuid),

    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error("System busy, please retry: {0}")]
    Busy(String),

    /// Order is cancelled but some lines could not be put back into stock.
    #[error("Order {order_id} cancelled but stock restore failed for products {products:?}")]
    StockRestoreIncomplete { order_id: Uuid, products: Vec<Uuid> },

    #[error("Stock error: {0}")]
    Stock(StockError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrderError {
    /// Errors caused by the request itself, shown verbatim to the buyer.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            OrderError::NotFound(_)
                | OrderError::InvalidState { .. }
                | OrderError::EmptyLines
                | OrderError::InvalidQuantity { .. }
                | OrderError::ProductUnavailable(_)
                | OrderError::InsufficientStock { .. }
                | OrderError::Coupon(_)
        )
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Busy(_) => true,
            OrderError::Stock(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StockError> for OrderError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Busy { .. } => OrderError::Busy(err.to_string()),
            other => OrderError::Stock(other),
        }
    }
}

impl From<CacheError> for OrderError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Busy { .. } => OrderError::Busy(err.to_string()),
            CacheError::Loader { source, .. } => OrderError::Internal(source),
            CacheError::Store(e) => OrderError::Internal(e),
        }
    }
}
