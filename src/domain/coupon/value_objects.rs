use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Coupon Value Objects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CouponKind {
    /// Fixed amount off.
    FlatAmount { amount: Decimal },
    /// Pay `rate` of the amount (0.8 = 20% off), discount capped at `max_discount`.
    Percentage {
        rate: Decimal,
        max_discount: Option<Decimal>,
    },
    FreeShipping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponStatus {
    Unused,
    Used,
    Expired,
}

impl CouponStatus {
    pub fn code(self) -> i16 {
        match self {
            CouponStatus::Unused => 1,
            CouponStatus::Used => 2,
            CouponStatus::Expired => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(CouponStatus::Unused),
            2 => Some(CouponStatus::Used),
            3 => Some(CouponStatus::Expired),
            _ => None,
        }
    }
}

/// A buyer's claimed coupon as seen by the order path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponSnapshot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub kind: CouponKind,
    pub min_amount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: CouponStatus,
}
