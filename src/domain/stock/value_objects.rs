use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::StockError;

// ============================================================================
// Stock Value Objects
// ============================================================================

/// Catalog view of a product, cached by the read path.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub on_sale: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct StockItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

impl StockItem {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self { product_id, quantity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    Deducted,
    /// The conditional decrement matched no row: available < requested.
    InsufficientStock,
}

/// Why a batch stopped.
#[derive(Debug)]
pub enum BatchFailure {
    InsufficientStock { product_id: Uuid },
    Error(StockError),
}

/// Result of a per-product-locked batch deduction. The batch is not atomic:
/// on `PartialFailure`, items before `failed_index` stay deducted until the
/// caller compensates them.
#[derive(Debug)]
pub enum BatchOutcome {
    Success,
    PartialFailure {
        failed_index: usize,
        cause: BatchFailure,
    },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success)
    }

    /// The prefix of `items` that was actually deducted.
    pub fn applied<'a>(&self, items: &'a [StockItem]) -> &'a [StockItem] {
        match self {
            BatchOutcome::Success => items,
            BatchOutcome::PartialFailure { failed_index, .. } => {
                &items[..(*failed_index).min(items.len())]
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompensationReport {
    pub restored: usize,
    /// Items that could not be put back; each one was logged.
    pub failed: Vec<StockItem>,
}

impl CompensationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
