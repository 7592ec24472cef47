//! The bandwidth rule applied to every client bucket.

use std::time::Duration;

use crate::config::RateLimitSettings;
use crate::error::{Result, TollgateError};

/// Immutable rate limit policy: `capacity` tokens restored over each `refill_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    capacity: u64,
    refill_period: Duration,
}

impl RateLimitPolicy {
    /// Create a policy. Both values must be non-zero.
    pub fn new(capacity: u64, refill_period: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(TollgateError::Config(
                "rate limit capacity must be greater than zero".to_string(),
            ));
        }
        if refill_period.is_zero() {
            return Err(TollgateError::Config(
                "rate limit refill period must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            refill_period,
        })
    }

    /// Build the policy described by the `rate_limit` configuration section.
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self> {
        let minutes = settings.duration_minutes.checked_mul(60).ok_or_else(|| {
            TollgateError::Config("rate_limit.duration_minutes is too large".to_string())
        })?;
        Self::new(settings.requests, Duration::from_secs(minutes))
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Interval over which a full `capacity` is restored.
    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }
}
