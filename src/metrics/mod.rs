// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Lock lease acquisition (outcome, wait latency, token mismatches)
// - Cache lookups (hit, tombstone, loaded, absent)
// - Stock operations and compensation failures
// - Order status transitions and creation failures
// - Timeout sweeper runs
// - Retry and circuit breaker behaviour
// - Notification delivery
//
// Each Metrics value owns its own Registry, so tests can create as many as
// they like. Scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Lock Metrics
    pub lock_acquisitions: IntCounterVec,
    pub lock_wait_duration: HistogramVec,
    pub lock_release_mismatches: IntCounter,

    // Cache Metrics
    pub cache_lookups: IntCounterVec,

    // Stock Metrics
    pub stock_operations: IntCounterVec,
    pub stock_compensation_failures: IntCounter,

    // Order Metrics
    pub order_transitions: IntCounterVec,
    pub order_create_failures: IntCounterVec,

    // Sweeper Metrics
    pub sweeper_runs: IntCounterVec,
    pub sweeper_orders: IntCounterVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,

    // Notification Metrics
    pub notifications: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Lock Metrics
        let lock_acquisitions = IntCounterVec::new(
            Opts::new("lock_acquisitions_total", "Lock acquisition attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(lock_acquisitions.clone()))?;

        let lock_wait_duration = HistogramVec::new(
            HistogramOpts::new("lock_wait_duration_seconds", "Time spent waiting for a lock lease")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 3.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(lock_wait_duration.clone()))?;

        let lock_release_mismatches = IntCounter::new(
            "lock_release_mismatches_total",
            "Releases attempted with a token that no longer held the lock",
        )?;
        registry.register(Box::new(lock_release_mismatches.clone()))?;

        // Cache Metrics
        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Read-through cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        // Stock Metrics
        let stock_operations = IntCounterVec::new(
            Opts::new("stock_operations_total", "Stock ledger operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(stock_operations.clone()))?;

        let stock_compensation_failures = IntCounter::new(
            "stock_compensation_failures_total",
            "Stock items that could not be restored during compensation",
        )?;
        registry.register(Box::new(stock_compensation_failures.clone()))?;

        // Order Metrics
        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let order_create_failures = IntCounterVec::new(
            Opts::new("order_create_failures_total", "Rejected or failed order creations"),
            &["reason"],
        )?;
        registry.register(Box::new(order_create_failures.clone()))?;

        // Sweeper Metrics
        let sweeper_runs = IntCounterVec::new(
            Opts::new("sweeper_runs_total", "Timeout sweeper runs"),
            &["outcome"],
        )?;
        registry.register(Box::new(sweeper_runs.clone()))?;

        let sweeper_orders = IntCounterVec::new(
            Opts::new("sweeper_orders_total", "Orders handled by the timeout sweeper"),
            &["outcome"],
        )?;
        registry.register(Box::new(sweeper_orders.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Total successful retries"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        // Notification Metrics
        let notifications = IntCounterVec::new(
            Opts::new("order_notifications_total", "Order status notifications by outcome"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(notifications.clone()))?;

        Ok(Self {
            registry,
            lock_acquisitions,
            lock_wait_duration,
            lock_release_mismatches,
            cache_lookups,
            stock_operations,
            stock_compensation_failures,
            order_transitions,
            order_create_failures,
            sweeper_runs,
            sweeper_orders,
            retry_attempts_total,
            retry_success,
            retry_failure,
            circuit_breaker_state,
            notifications,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_lock_wait(&self, outcome: &str, wait_secs: f64) {
        self.lock_acquisitions.with_label_values(&[outcome]).inc();
        self.lock_wait_duration.with_label_values(&[outcome]).observe(wait_secs);
    }

    pub fn record_release_mismatch(&self) {
        self.lock_release_mismatches.inc();
    }

    pub fn record_cache_lookup(&self, result: &str) {
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_stock_operation(&self, operation: &str, outcome: &str) {
        self.stock_operations.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_compensation_failure(&self) {
        self.stock_compensation_failures.inc();
    }

    pub fn record_order_transition(&self, from: &str, to: &str) {
        self.order_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_order_create_failure(&self, reason: &str) {
        self.order_create_failures.with_label_values(&[reason]).inc();
    }

    pub fn record_sweeper_run(&self, outcome: &str) {
        self.sweeper_runs.with_label_values(&[outcome]).inc();
    }

    pub fn record_sweeper_order(&self, outcome: &str) {
        self.sweeper_orders.with_label_values(&[outcome]).inc();
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    /// Helper to record retry outcome
    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }

    /// Helper to update circuit breaker state
    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_notification(&self, event_type: &str, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.notifications.with_label_values(&[event_type, outcome]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.registry.gather().len() > 0);
    }

    #[test]
    fn test_record_lock_wait() {
        let metrics = Metrics::new().unwrap();
        metrics.record_lock_wait("acquired", 0.002);
        metrics.record_lock_wait("timeout", 3.0);

        let gathered = metrics.registry.gather();
        let acquisitions = gathered.iter().find(|m| m.name() == "lock_acquisitions_total").unwrap();
        assert_eq!(acquisitions.metric.len(), 2); // One series per outcome
    }

    #[test]
    fn test_record_retry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_retry_attempt("stock_restore", 1);
        metrics.record_retry_attempt("stock_restore", 2);
        metrics.record_retry_outcome("stock_restore", true);

        let gathered = metrics.registry.gather();
        let attempts = gathered.iter().find(|m| m.name() == "retry_attempts_total").unwrap();
        assert_eq!(attempts.metric.len(), 2); // Two different attempt labels
    }

    #[test]
    fn test_record_compensation_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_compensation_failure();
        metrics.record_compensation_failure();

        let gathered = metrics.registry.gather();
        let failures = gathered
            .iter()
            .find(|m| m.name() == "stock_compensation_failures_total")
            .unwrap();
        assert_eq!(failures.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state(0); // Closed
        metrics.update_circuit_breaker_state(1); // Open

        let gathered = metrics.registry.gather();
        let state = gathered.iter().find(|m| m.name() == "circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
