use uuid::Uuid;

use super::value_objects::ReceiverInfo;

// ============================================================================
// Order Commands - Represent buyer intent at checkout
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

impl OrderLineRequest {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self { product_id, quantity }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub buyer_id: Uuid,
    pub lines: Vec<OrderLineRequest>,
    pub receiver: ReceiverInfo,
    /// The buyer's user-coupon id, if one is applied.
    pub coupon_id: Option<Uuid>,
    pub remark: Option<String>,
}

impl CreateOrder {
    pub fn new(buyer_id: Uuid, lines: Vec<OrderLineRequest>, receiver: ReceiverInfo) -> Self {
        Self {
            buyer_id,
            lines,
            receiver,
            coupon_id: None,
            remark: None,
        }
    }

    pub fn with_coupon(mut self, coupon_id: Uuid) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }
}
