// ============================================================================
// Coupon Domain - what the order path needs to know about coupons
// ============================================================================

pub mod discount;
pub mod errors;
pub mod value_objects;

pub use discount::{calculate_discount, ensure_payable, validate_for_order};
pub use errors::*;
pub use value_objects::*;
