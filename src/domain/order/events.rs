use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{CancelReason, Order, OrderStatus};

// ============================================================================
// Order Events - status changes pushed to the notification sink
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created(OrderEventData),
    Paid(OrderEventData),
    Shipped(OrderEventData),
    Completed(OrderEventData),
    Cancelled(OrderCancelled),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderEventData {
    pub order_id: Uuid,
    pub order_no: String,
    pub buyer_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    #[serde(flatten)]
    pub data: OrderEventData,
    pub reason: CancelReason,
}

impl OrderEvent {
    /// Event for an order that has just entered its current status.
    pub fn for_status(order: &Order, reason: Option<CancelReason>) -> Self {
        let data = OrderEventData {
            order_id: order.id,
            order_no: order.order_no.clone(),
            buyer_id: order.buyer_id,
            timestamp: order.updated_at,
        };

        match order.status {
            OrderStatus::PendingPayment => OrderEvent::Created(data),
            OrderStatus::Paid => OrderEvent::Paid(data),
            OrderStatus::Shipped => OrderEvent::Shipped(data),
            OrderStatus::Completed => OrderEvent::Completed(data),
            OrderStatus::Cancelled => OrderEvent::Cancelled(OrderCancelled {
                data,
                reason: reason.unwrap_or(CancelReason::Buyer),
            }),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "OrderCreated",
            OrderEvent::Paid(_) => "OrderPaid",
            OrderEvent::Shipped(_) => "OrderShipped",
            OrderEvent::Completed(_) => "OrderCompleted",
            OrderEvent::Cancelled(_) => "OrderCancelled",
        }
    }

    pub fn data(&self) -> &OrderEventData {
        match self {
            OrderEvent::Created(d)
            | OrderEvent::Paid(d)
            | OrderEvent::Shipped(d)
            | OrderEvent::Completed(d) => d,
            OrderEvent::Cancelled(c) => &c.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_event_serializes_with_reason() {
        let event = OrderEvent::Cancelled(OrderCancelled {
            data: OrderEventData {
                order_id: Uuid::new_v4(),
                order_no: "ORD1".to_string(),
                buyer_id: Uuid::new_v4(),
                timestamp: Utc::now(),
            },
            reason: CancelReason::Timeout,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Cancelled\""));
        assert!(json.contains("Timeout"));

        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_type(), "OrderCancelled");
    }
}
