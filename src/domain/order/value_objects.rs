use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    /// Price frozen at checkout time.
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ReceiverInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
}

/// Order status. Numeric codes match the persisted `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Shipped,
    Completed,
    Cancelled,
}

/// The operations that move an order between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Pay,
    Ship,
    Complete,
    Cancel,
}

impl OrderStatus {
    pub fn code(self) -> i16 {
        match self {
            OrderStatus::PendingPayment => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Completed => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OrderStatus::PendingPayment),
            1 => Some(OrderStatus::Paid),
            2 => Some(OrderStatus::Shipped),
            3 => Some(OrderStatus::Completed),
            4 => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// The whole state machine. Anything not listed is rejected.
    pub fn next(self, action: OrderAction) -> Option<OrderStatus> {
        match (self, action) {
            (OrderStatus::PendingPayment, OrderAction::Pay) => Some(OrderStatus::Paid),
            (OrderStatus::Paid, OrderAction::Ship) => Some(OrderStatus::Shipped),
            (OrderStatus::Shipped, OrderAction::Complete) => Some(OrderStatus::Completed),
            (OrderStatus::PendingPayment, OrderAction::Cancel) => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::PendingPayment => "PendingPayment",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

impl OrderAction {
    pub fn required_status(self) -> OrderStatus {
        match self {
            OrderAction::Pay | OrderAction::Cancel => OrderStatus::PendingPayment,
            OrderAction::Ship => OrderStatus::Paid,
            OrderAction::Complete => OrderStatus::Shipped,
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderAction::Pay => "pay",
            OrderAction::Ship => "ship",
            OrderAction::Complete => "complete",
            OrderAction::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Buyer,
    Timeout,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub buyer_id: Uuid,
    pub lines: Vec<OrderLine>,
    pub status: OrderStatus,
    pub coupon_id: Option<Uuid>,
    pub original_amount: Decimal,
    pub discount: Decimal,
    pub payable_amount: Decimal,
    pub receiver: ReceiverInfo,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validate `action` against the current status and apply it in memory.
    pub fn apply(&mut self, action: OrderAction, at: DateTime<Utc>) -> Result<OrderStatus, OrderError> {
        let next = self.status.next(action).ok_or(OrderError::InvalidState {
            order_id: self.id,
            status: self.status,
            action,
        })?;

        match next {
            OrderStatus::Paid => self.paid_at = Some(at),
            OrderStatus::Shipped => self.shipped_at = Some(at),
            OrderStatus::Completed => self.finished_at = Some(at),
            OrderStatus::PendingPayment | OrderStatus::Cancelled => {}
        }
        self.status = next;
        self.updated_at = at;
        Ok(next)
    }

    pub fn total_quantity(&self) -> i32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// Time left to pay a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentWindow {
    Remaining(std::time::Duration),
    Expired,
    NotPayable,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_order() -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_no: "ORD20240101000000000abcdef".to_string(),
            buyer_id: Uuid::new_v4(),
            lines: vec![OrderLine {
                product_id: Uuid::new_v4(),
                product_name: "Kettle".to_string(),
                quantity: 2,
                unit_price: Decimal::new(1999, 2),
            }],
            status: OrderStatus::PendingPayment,
            coupon_id: None,
            original_amount: Decimal::new(3998, 2),
            discount: Decimal::ZERO,
            payable_amount: Decimal::new(3998, 2),
            receiver: ReceiverInfo::default(),
            remark: None,
            created_at: now,
            paid_at: None,
            shipped_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OrderStatus::from_code(9), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = pending_order();
        let at = Utc::now();

        assert_eq!(order.apply(OrderAction::Pay, at).unwrap(), OrderStatus::Paid);
        assert_eq!(order.paid_at, Some(at));
        assert_eq!(order.apply(OrderAction::Ship, at).unwrap(), OrderStatus::Shipped);
        assert_eq!(order.apply(OrderAction::Complete, at).unwrap(), OrderStatus::Completed);
        assert!(order.status.is_terminal());
        assert!(order.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_reject_every_action() {
        for terminal in [OrderStatus::Completed, OrderStatus::Cancelled] {
            for action in [
                OrderAction::Pay,
                OrderAction::Ship,
                OrderAction::Complete,
                OrderAction::Cancel,
            ] {
                assert_eq!(terminal.next(action), None);
            }
        }
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut order = pending_order();
        order.apply(OrderAction::Pay, Utc::now()).unwrap();

        let err = order.apply(OrderAction::Cancel, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidState { status: OrderStatus::Paid, action: OrderAction::Cancel, .. }
        ));
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn test_required_status_matches_transition_table() {
        for action in [OrderAction::Pay, OrderAction::Ship, OrderAction::Complete, OrderAction::Cancel] {
            assert!(action.required_status().next(action).is_some());
        }
    }

    #[test]
    fn test_order_serialization_keeps_every_field() {
        let mut order = pending_order();
        order.coupon_id = Some(Uuid::new_v4());
        order.remark = Some("leave at door".to_string());
        order.apply(OrderAction::Pay, Utc::now()).unwrap();

        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }

    #[test]
    fn test_line_subtotal() {
        let order = pending_order();
        assert_eq!(order.lines[0].subtotal(), Decimal::new(3998, 2));
        assert_eq!(order.total_quantity(), 2);
    }
}
