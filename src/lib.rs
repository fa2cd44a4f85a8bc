// ============================================================================
// shop_orders - inventory reservation and order lifecycle core
// ============================================================================
//
// lock      per-key leases over a shared KV store
// cache     read-through cache with rebuild lock, tombstones and TTL jitter
// domain    stock ledger, order lifecycle, coupon rules
// tasks     timeout sweeper for unpaid orders
// store     ports + Redis / Postgres / in-memory adapters
// messaging order status notifications (Redpanda or log)
// metrics   Prometheus registry and /metrics endpoint
//
// ============================================================================

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod lock;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod tasks;
pub mod utils;

pub use app::{Backends, ServiceConfig, Services};
pub use config::AppConfig;
