//! レート制御のためのトークンバケット
//!
//! タイマーを一切使わない遅延補充方式。`take` のたびに経過時間から補充量を
//! 計算するため、バックグラウンドタスクは不要です。時計は注入されるので
//! テストで決定的に動かせます。

use std::sync::Arc;

use crate::common::time::Clock;

/// Lazy-refill token bucket.
///
/// `take(n)` advances whole refill periods based on the injected clock,
/// caps tokens at capacity, then deducts `n` iff enough tokens remain.
/// Repeated rapid calls within one period observe the same state.
pub struct TokenBucket {
    capacity: u64,
    refill_tokens: u64,
    refill_interval_ms: i64,
    tokens: u64,
    last_refill_ms: i64,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a bucket starting full.
    pub fn new(
        capacity: u64,
        refill_tokens: u64,
        refill_interval_ms: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_unix_millis();
        Self {
            capacity,
            refill_tokens,
            refill_interval_ms,
            tokens: capacity,
            last_refill_ms: now,
            clock,
        }
    }

    /// Try to consume `n` tokens. Returns false without deducting when the
    /// bucket holds fewer than `n`.
    pub fn take(&mut self, n: u64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (after a refill pass).
    pub fn available(&mut self) -> u64 {
        self.refill();
        self.tokens
    }

    fn refill(&mut self) {
        let now = self.clock.now_unix_millis();
        let elapsed = now - self.last_refill_ms;
        if elapsed < self.refill_interval_ms {
            return;
        }
        let periods = (elapsed / self.refill_interval_ms) as u64;
        self.tokens = self
            .tokens
            .saturating_add(periods.saturating_mul(self.refill_tokens))
            .min(self.capacity);
        // advance by whole periods only, so partial elapse keeps accruing
        self.last_refill_ms += periods as i64 * self.refill_interval_ms;
    }
}
