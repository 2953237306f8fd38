//! Engine configuration.
//!
//! Loaded from environment variables with the defaults the system was tuned
//! for: a 30 second hold, a 10 second lock lease (comfortably above the
//! expected transaction time), and a sweep every 10 seconds so no pending
//! reservation survives materially longer than its TTL.

use std::env;
use std::time::Duration;

/// Recognized engine options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reservation hold duration in seconds.
    pub reservation_ttl_seconds: u64,
    /// Distributed lock lease duration.
    pub lock_ttl: Duration,
    /// Period between sweeper passes.
    pub sweeper_interval: Duration,
    /// Maximum stale reservations processed per sweep pass.
    pub sweep_batch_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_seconds: 30,
            lock_ttl: Duration::from_millis(10_000),
            sweeper_interval: Duration::from_secs(10),
            sweep_batch_limit: 500,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_ttl_seconds: env::var("RESERVATION_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reservation_ttl_seconds),
            lock_ttl: env::var("LOCK_TTL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.lock_ttl, Duration::from_millis),
            sweeper_interval: env::var("SWEEPER_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.sweeper_interval, Duration::from_secs),
            sweep_batch_limit: env::var("SWEEP_BATCH_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sweep_batch_limit),
        }
    }

    /// The hold window as a chrono duration for deadline arithmetic.
    ///
    /// # Panics
    ///
    /// Never in practice: the TTL is bounded far below `i64::MAX`
    /// milliseconds.
    #[must_use]
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn hold_window(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(
            i64::try_from(self.reservation_ttl_seconds).expect("reservation TTL fits in i64"),
        )
        .expect("reservation TTL within chrono bounds")
    }
}
