//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace};

use super::bucket::Decision;
use super::clock::{Clock, SystemClock};
use super::policy::RateLimitPolicy;
use super::registry::BucketRegistry;

/// Tokens spent by a single request.
const REQUEST_COST: u64 = 1;

/// The rate limiting decision engine.
///
/// Owns the per-client bucket registry and the clock used for refills. This
/// struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug)]
pub struct RateLimiter {
    registry: BucketRegistry,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter using the system clock.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a rate limiter driven by a custom clock.
    pub fn with_clock(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: BucketRegistry::new(policy),
            clock,
        }
    }

    /// Decide whether one more request from `key` is allowed, spending a token if so.
    pub fn should_allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    /// Like [`should_allow`](Self::should_allow), returning the full [`Decision`].
    pub fn check(&self, key: &str) -> Decision {
        let now = self.clock.now();
        let bucket = self.registry.resolve(key, now);
        let decision = bucket.try_consume_and_probe(REQUEST_COST, now);

        trace!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Rate limit decision"
        );

        if !decision.allowed {
            debug!(
                key = %key,
                retry_after = ?decision.retry_after,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// The policy applied to every client.
    pub fn policy(&self) -> &RateLimitPolicy {
        self.registry.policy()
    }

    /// Number of clients with a bucket.
    pub fn bucket_count(&self) -> usize {
        self.registry.len()
    }

    /// Forget every client.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::ratelimit::ManualClock;
    use std::time::Duration;

    fn limiter(capacity: u64, period: Duration) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let policy = RateLimitPolicy::new(capacity, period).unwrap();
        (RateLimiter::with_clock(policy, clock.clone()), clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let (limiter, _) = limiter(3, Duration::from_secs(60));
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.policy().capacity(), 3);
    }

    #[test]
    fn test_should_allow_creates_bucket() {
        let (limiter, _) = limiter(3, Duration::from_secs(60));

        assert!(limiter.should_allow("10.0.0.1"));
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_exact_quota() {
        let (limiter, _) = limiter(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.should_allow("client"));
        }
        assert!(!limiter.should_allow("client"));
    }

    #[test]
    fn test_end_to_end_regeneration() {
        let settings = RateLimitSettings {
            requests: 5,
            duration_minutes: 1,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(
            RateLimitPolicy::from_settings(&settings).unwrap(),
            clock.clone(),
        );

        for _ in 0..5 {
            assert!(limiter.should_allow("A"));
        }
        assert!(!limiter.should_allow("A"));

        // A fifth of the window restores one token
        clock.advance(Duration::from_secs(12));
        assert!(limiter.should_allow("A"));
        assert!(!limiter.should_allow("A"));
    }

    #[test]
    fn test_clients_have_separate_buckets() {
        let (limiter, _) = limiter(1, Duration::from_secs(60));

        assert!(limiter.should_allow("a"));
        assert!(!limiter.should_allow("a"));
        assert!(limiter.should_allow("b"));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_check_reports_retry_after() {
        let (limiter, _) = limiter(2, Duration::from_secs(60));

        let decision = limiter.check("a");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        limiter.check("a");
        let decision = limiter.check("a");
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_clear_buckets() {
        let (limiter, _) = limiter(1, Duration::from_secs(60));

        assert!(limiter.should_allow("a"));
        assert_eq!(limiter.bucket_count(), 1);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.should_allow("a"));
    }

    #[test]
    fn test_concurrent_requests_respect_quota() {
        const THREADS: usize = 24;

        let (limiter, _) = limiter(THREADS as u64 - 1, Duration::from_secs(60));
        let barrier = std::sync::Barrier::new(THREADS);

        let allowed = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        limiter.should_allow("burst")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|allowed| *allowed)
                .count()
        });

        assert_eq!(allowed, THREADS - 1);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
