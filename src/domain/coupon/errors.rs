use rust_decimal::Decimal;
use uuid::Uuid;

// ============================================================================
// Coupon Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CouponError {
    #[error("Coupon {0} does not exist")]
    NotFound(Uuid),

    #[error("Coupon {0} does not belong to this buyer")]
    NotOwner(Uuid),

    #[error("Coupon {0} has already been used or has expired")]
    Unavailable(Uuid),

    #[error("Coupon {0} is outside its validity window")]
    OutsideValidity(Uuid),

    #[error("Order amount {amount} is below the coupon minimum {min_amount}")]
    BelowMinimum { amount: Decimal, min_amount: Decimal },

    #[error("Coupon discount {discount} is not less than the order amount {amount}")]
    DiscountTooLarge { discount: Decimal, amount: Decimal },

    #[error("Coupon {0} is misconfigured")]
    Misconfigured(Uuid),
}
