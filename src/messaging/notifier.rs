use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::redpanda::RedpandaClient;
use crate::domain::order::OrderEvent;
use crate::metrics::Metrics;
use crate::utils::{retry_with_backoff, RetryConfig};

// ============================================================================
// Order Status Notifiers
// ============================================================================
//
// Sinks for order status changes. The order lifecycle fires these without
// waiting; a failed notification never affects the order itself.
//
// ============================================================================

pub const ORDER_STATUS_TOPIC: &str = "order-status-events";

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, event: &OrderEvent) -> Result<()>;
}

/// Publishes JSON events keyed by buyer, so one buyer's events stay ordered
/// within a partition.
pub struct RedpandaNotifier {
    client: RedpandaClient,
    topic: String,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl RedpandaNotifier {
    pub fn new(client: RedpandaClient, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            topic: ORDER_STATUS_TOPIC.to_string(),
            retry: RetryConfig::conservative(),
            metrics,
        }
    }
}

#[async_trait]
impl StatusNotifier for RedpandaNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to serialize order event")?;
        let key = event.data().buyer_id.to_string();

        retry_with_backoff(&self.retry, "notify", Some(&self.metrics), |_attempt| {
            self.client.publish(&self.topic, &key, &payload)
        })
        .await
        .into_result()
    }
}

/// Writes events to the log only. Used when no broker is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<()> {
        let data = event.data();
        tracing::info!(
            event_type = event.event_type(),
            order_id = %data.order_id,
            order_no = %data.order_no,
            buyer_id = %data.buyer_id,
            "📣 Order status changed"
        );
        Ok(())
    }
}

/// Keeps every event in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<OrderEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Poll until at least `count` events arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<OrderEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
