use std::time::Duration;

use anyhow::{Context, Result};

use crate::app::ServiceConfig;

// ============================================================================
// Process configuration from the environment
// ============================================================================
//
//   DATABASE_URL            postgres://... (required)
//   REDIS_URL               default redis://127.0.0.1:6379
//   KAFKA_BROKERS           optional; without it notifications only go to the log
//   METRICS_PORT            default 9090
//   ORDER_TIMEOUT_MINUTES   default 15
//   SWEEP_INTERVAL_SECS     default 300
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub kafka_brokers: Option<String>,
    pub metrics_port: u16,
    pub order_timeout: Duration,
    pub sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let kafka_brokers = lookup("KAFKA_BROKERS").filter(|b| !b.trim().is_empty());

        let metrics_port = parse_or(&lookup, "METRICS_PORT", 9090u16)?;
        let timeout_minutes = parse_or(&lookup, "ORDER_TIMEOUT_MINUTES", 15u64)?;
        let sweep_secs = parse_or(&lookup, "SWEEP_INTERVAL_SECS", 300u64)?;

        Ok(Self {
            database_url,
            redis_url,
            kafka_brokers,
            metrics_port,
            order_timeout: Duration::from_secs(timeout_minutes * 60),
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    /// Component configs with the timeout and sweep period applied.
    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.order.payment_timeout = self.order_timeout;
        config.sweeper.timeout = self.order_timeout;
        config.sweeper.interval = self.sweep_interval;
        config
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
