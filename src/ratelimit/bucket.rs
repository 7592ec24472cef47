//! Token bucket with lazy, continuous refill.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::policy::RateLimitPolicy;

/// Outcome of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the tokens were granted
    pub allowed: bool,
    /// Whole tokens left in the bucket after the attempt
    pub remaining: u64,
    /// Time until the requested tokens will be available; only set on denial
    pub retry_after: Option<Duration>,
}

/// Point-in-time view of a bucket's state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    /// Fractional token balance
    pub available_tokens: f64,
    /// When the balance was last recalculated
    pub last_refill: Instant,
}

#[derive(Debug)]
struct BucketState {
    available_tokens: f64,
    last_refill: Instant,
}

/// A single client's token bucket.
///
/// Tokens are not added on a timer; elapsed time is converted to tokens when
/// the bucket is used. Refill, comparison and decrement happen under one lock,
/// so concurrent consumers never spend the same token twice.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_period_secs: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        let capacity = policy.capacity() as f64;
        Self {
            capacity,
            refill_period_secs: policy.refill_period().as_secs_f64(),
            state: Mutex::new(BucketState {
                available_tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Try to take `cost` tokens at time `now`.
    ///
    /// Returns `true` if the tokens were taken. A denial leaves the balance untouched.
    pub fn try_consume(&self, cost: u64, now: Instant) -> bool {
        self.try_consume_and_probe(cost, now).allowed
    }

    /// Like [`try_consume`](Self::try_consume), also reporting the remaining
    /// balance and, on denial, how long until `cost` tokens will have accrued.
    pub fn try_consume_and_probe(&self, cost: u64, now: Instant) -> Decision {
        let cost = cost as f64;
        let mut state = self.state.lock();

        self.refill(&mut state, now);

        if state.available_tokens >= cost {
            state.available_tokens -= cost;
            Decision {
                allowed: true,
                remaining: state.available_tokens.floor() as u64,
                retry_after: None,
            }
        } else {
            let deficit = cost - state.available_tokens;
            Decision {
                allowed: false,
                remaining: state.available_tokens.floor() as u64,
                retry_after: Some(self.time_to_earn(deficit)),
            }
        }
    }

    /// Read the current state without refilling.
    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            available_tokens: state.available_tokens,
            last_refill: state.last_refill,
        }
    }

    /// Maximum number of tokens this bucket holds.
    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            let earned = elapsed * self.capacity / self.refill_period_secs;
            state.available_tokens = (state.available_tokens + earned).min(self.capacity);
            state.last_refill = now;
        }
    }

    fn time_to_earn(&self, tokens: f64) -> Duration {
        Duration::try_from_secs_f64(tokens * self.refill_period_secs / self.capacity)
            .unwrap_or(Duration::MAX)
    }
}
