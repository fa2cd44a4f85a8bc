// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// - stock:  per-product stock ledger (locked, conditional writes)
// - order:  order state machine and lifecycle service
// - coupon: coupon rules consumed at checkout
//
// Store access goes through the ports in `crate::store`.
//
// ============================================================================

pub mod coupon;
pub mod order;
pub mod stock;
