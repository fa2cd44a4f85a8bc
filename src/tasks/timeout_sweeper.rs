use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::order::{CancelReason, OrderError, OrderLifecycle};
use crate::lock::{DistributedLock, GuardedError};
use crate::metrics::Metrics;
use crate::store::OrderRepository;

// ============================================================================
// Timeout Sweeper - cancels orders left unpaid past the payment window
// ============================================================================
//
// Every `interval`:
//   1. take the cluster-wide sweep lock without waiting (another node may
//      already be sweeping; then this run is skipped)
//   2. load up to `batch_limit` PendingPayment orders older than `timeout`
//   3. cancel each one through the normal cancel path (reason = Timeout),
//      which also returns its stock
//
// An order that was paid or cancelled between the scan and the cancel is
// rejected by the status compare-and-set and counted as skipped.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub batch_limit: i64,
    pub lock_key: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(15 * 60),
            batch_limit: 500,
            lock_key: "order_timeout_sweep".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub cancelled: usize,
    /// No longer pending by the time the sweeper got to them.
    pub skipped: usize,
    pub failed: usize,
    /// Another instance held the sweep lock; nothing was scanned.
    pub lock_busy: bool,
}

#[derive(Clone)]
pub struct TimeoutSweeper {
    orders: Arc<dyn OrderRepository>,
    lifecycle: OrderLifecycle,
    lock: DistributedLock,
    config: SweeperConfig,
    metrics: Arc<Metrics>,
}

impl TimeoutSweeper {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        lifecycle: OrderLifecycle,
        lock: DistributedLock,
        config: SweeperConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orders,
            lifecycle,
            lock,
            config,
            metrics,
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// One sweep treating `now` as the current time. Never fails; problems
    /// are logged and counted in the report.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let guarded = self
            .lock
            .execute_guarded(&self.config.lock_key, self.config.interval, Duration::ZERO, || {
                self.cancel_stale(now)
            });

        // The lock is already released when a panic gets here; the loop must survive it.
        let result = match AssertUnwindSafe(guarded).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.record_sweeper_run("error");
                tracing::error!("Timeout sweep panicked, next run continues on schedule");
                return SweepReport::default();
            }
        };

        match result {
            Ok(report) => {
                self.metrics.record_sweeper_run("completed");
                if report.scanned > 0 {
                    tracing::info!(
                        scanned = report.scanned,
                        cancelled = report.cancelled,
                        skipped = report.skipped,
                        failed = report.failed,
                        "⏰ Timeout sweep finished"
                    );
                }
                report
            }
            Err(GuardedError::Contention { .. }) => {
                self.metrics.record_sweeper_run("lock_busy");
                tracing::debug!("Timeout sweep skipped, another instance is sweeping");
                SweepReport {
                    lock_busy: true,
                    ..SweepReport::default()
                }
            }
            Err(GuardedError::Store(e)) | Err(GuardedError::Body(e)) => {
                self.metrics.record_sweeper_run("error");
                tracing::error!(error = %e, "Timeout sweep aborted");
                SweepReport::default()
            }
        }
    }

    async fn cancel_stale(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        let cutoff = now - chrono::Duration::from_std(self.config.timeout)?;
        let stale = self
            .orders
            .find_stale_pending(cutoff, self.config.batch_limit)
            .await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };

        for order in stale {
            let outcome = match self
                .lifecycle
                .cancel_with_reason(order.id, CancelReason::Timeout)
                .await
            {
                Ok(_) => {
                    report.cancelled += 1;
                    "cancelled"
                }
                // Cancelled, but some stock needs a manual fix (already logged).
                Err(OrderError::StockRestoreIncomplete { .. }) => {
                    report.cancelled += 1;
                    "cancelled_restore_incomplete"
                }
                Err(OrderError::InvalidState { status, .. }) => {
                    tracing::debug!(order_no = %order.order_no, status = %status, "Order left PendingPayment before timeout cancel");
                    report.skipped += 1;
                    "skipped"
                }
                Err(e) => {
                    tracing::warn!(order_no = %order.order_no, error = %e, "Timeout cancel failed, will retry next sweep");
                    report.failed += 1;
                    "failed"
                }
            };
            self.metrics.record_sweeper_order(outcome);
        }

        Ok(report)
    }

    /// Run `sweep_once` every `interval` until `shutdown` flips to true or
    /// its sender is dropped. The first sweep runs immediately.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = self.config.interval.as_secs(),
                timeout_secs = self.config.timeout.as_secs(),
                "⏰ Timeout sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Timeout sweeper stopped");
        })
    }
}
