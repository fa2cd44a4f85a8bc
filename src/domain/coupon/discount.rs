use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::errors::CouponError;
use super::value_objects::{CouponKind, CouponSnapshot, CouponStatus};

/// Flat discount granted by a free-shipping coupon.
pub const FREE_SHIPPING_DISCOUNT: Decimal = Decimal::from_parts(1000, 0, 0, false, 2);

/// Checks that `coupon` may be applied by `buyer_id` to an order of `amount` at `now`.
pub fn validate_for_order(
    coupon: &CouponSnapshot,
    buyer_id: Uuid,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(), CouponError> {
    if coupon.owner_id != buyer_id {
        return Err(CouponError::NotOwner(coupon.id));
    }
    if coupon.status != CouponStatus::Unused {
        return Err(CouponError::Unavailable(coupon.id));
    }
    if now < coupon.valid_from || now > coupon.valid_until {
        return Err(CouponError::OutsideValidity(coupon.id));
    }
    if let Some(min_amount) = coupon.min_amount {
        if amount < min_amount {
            return Err(CouponError::BelowMinimum { amount, min_amount });
        }
    }
    Ok(())
}

/// Reference discount arithmetic shared by the bundled coupon services.
pub fn calculate_discount(coupon: &CouponSnapshot, amount: Decimal) -> Result<Decimal, CouponError> {
    let discount = match &coupon.kind {
        CouponKind::FlatAmount { amount: off } => {
            if off.is_sign_negative() {
                return Err(CouponError::Misconfigured(coupon.id));
            }
            *off
        }
        CouponKind::Percentage { rate, max_discount } => {
            if *rate < Decimal::ZERO || *rate > Decimal::ONE {
                return Err(CouponError::Misconfigured(coupon.id));
            }
            let raw = amount * (Decimal::ONE - *rate);
            match max_discount {
                Some(cap) if raw > *cap => *cap,
                _ => raw,
            }
        }
        CouponKind::FreeShipping => FREE_SHIPPING_DISCOUNT,
    };

    Ok(discount.round_dp(2))
}

/// A discount must leave something to pay.
pub fn ensure_payable(discount: Decimal, amount: Decimal) -> Result<(), CouponError> {
    if discount >= amount {
        return Err(CouponError::DiscountTooLarge { discount, amount });
    }
    Ok(())
}
