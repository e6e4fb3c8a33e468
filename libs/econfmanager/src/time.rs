//! Time provider for registry entry timestamps
//!
//! Injected so tests can pin `updated_at` values.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait TimeProvider: Send + Sync + 'static {
    /// Current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        // A clock before 1970 reports 0 rather than failing the write
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests
#[derive(Debug, Default)]
pub struct FixedTimeProvider {
    timestamp_ms: AtomicI64,
}

impl FixedTimeProvider {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms: AtomicI64::new(timestamp_ms),
        }
    }

    pub fn set(&self, timestamp_ms: i64) {
        self.timestamp_ms.store(timestamp_ms, Ordering::Relaxed);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.timestamp_ms.fetch_add(delta_ms, Ordering::Relaxed);
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.timestamp_ms.load(Ordering::Relaxed)
    }
}
