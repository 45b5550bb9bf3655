//! Time-related utilities with clock abstraction for testability.
//!
//! The whole wire protocol speaks Unix epoch milliseconds (UTC); token
//! expiries, room TTLs, and rate-bucket refills all derive from the same
//! `Clock` so tests can drive them deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get the current Unix timestamp in milliseconds (UTC)
    fn now_unix_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_millis(&self) -> i64 {
        now_unix_millis()
    }
}

/// Fixed clock implementation for testing.
///
/// Returns a fixed time unless the test explicitly advances it, which makes
/// TTL-expiry and bucket-refill behavior reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    fixed_time: Arc<AtomicI64>,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: Arc::new(AtomicI64::new(fixed_time_millis)),
        }
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance(&self, millis: i64) {
        self.fixed_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute timestamp
    pub fn set(&self, fixed_time_millis: i64) {
        self.fixed_time.store(fixed_time_millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_unix_millis(&self) -> i64 {
        self.fixed_time.load(Ordering::SeqCst)
    }
}

/// Get the current Unix timestamp in milliseconds (UTC)
pub fn now_unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}
