use uuid::Uuid;

use crate::utils::IsTransient;

// ============================================================================
// Stock Errors
// ============================================================================
//
// Insufficient stock is not here: it is a normal `DeductOutcome`.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("System busy, please retry (stock lock for product {product_id} not acquired)")]
    Busy { product_id: Uuid },

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: Uuid, quantity: i32 },

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Stock store error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IsTransient for StockError {
    fn is_transient(&self) -> bool {
        matches!(self, StockError::Busy { .. })
    }
}
