//! Per-client bucket storage.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::bucket::TokenBucket;
use super::policy::RateLimitPolicy;

/// Concurrent map from client key to that client's [`TokenBucket`].
///
/// Buckets are created on first sight of a key and live until the registry is
/// cleared or dropped. There is no idle eviction, so memory grows with the
/// number of distinct keys seen.
#[derive(Debug)]
pub struct BucketRegistry {
    policy: RateLimitPolicy,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl BucketRegistry {
    /// Create an empty registry whose buckets follow `policy`.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            buckets: DashMap::new(),
        }
    }

    /// Return the bucket for `key`, creating a full one stamped with `now` if absent.
    ///
    /// Concurrent callers resolving the same new key all receive the same
    /// instance: creation happens under the map's shard lock for that key.
    /// Looking up an existing bucket never touches its state.
    pub fn resolve(&self, key: &str, now: Instant) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let bucket = self.buckets.entry(key.to_owned()).or_insert_with(|| {
            debug!(
                key = %key,
                capacity = self.policy.capacity(),
                refill_period = ?self.policy.refill_period(),
                "Creating new token bucket"
            );
            Arc::new(TokenBucket::new(&self.policy, now))
        });
        Arc::clone(bucket.value())
    }

    /// The policy applied to new buckets.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no client has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry(capacity: u64) -> BucketRegistry {
        BucketRegistry::new(RateLimitPolicy::new(capacity, Duration::from_secs(60)).unwrap())
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = registry(3);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_resolve_creates_full_bucket() {
        let registry = registry(3);
        let now = Instant::now();

        let bucket = registry.resolve("10.0.0.1", now);
        assert_eq!(registry.len(), 1);
        assert_eq!(bucket.snapshot().available_tokens, 3.0);
        assert_eq!(bucket.snapshot().last_refill, now);
    }

    #[test]
    fn test_same_key_returns_same_bucket() {
        let registry = registry(3);
        let now = Instant::now();

        let first = registry.resolve("10.0.0.1", now);
        assert!(first.try_consume(1, now));

        let second = registry.resolve("10.0.0.1", now + Duration::from_secs(5));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.snapshot().available_tokens, 2.0);
        // Lookup did not restamp the bucket
        assert_eq!(second.snapshot().last_refill, now);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_different_keys_are_isolated() {
        let registry = registry(1);
        let now = Instant::now();

        let a = registry.resolve("a", now);
        let b = registry.resolve("b", now);
        assert!(!Arc::ptr_eq(&a, &b));

        assert!(a.try_consume(1, now));
        assert!(!a.try_consume(1, now));
        assert!(b.try_consume(1, now));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear_buckets() {
        let registry = registry(1);
        let now = Instant::now();

        let before = registry.resolve("a", now);
        assert!(before.try_consume(1, now));

        registry.clear();
        assert!(registry.is_empty());

        let after = registry.resolve("a", now);
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.try_consume(1, now));
    }

    #[test]
    fn test_concurrent_resolve_creates_one_bucket() {
        const THREADS: usize = 32;

        let registry = registry(THREADS as u64);
        let now = Instant::now();
        let barrier = std::sync::Barrier::new(THREADS);

        let buckets: Vec<Arc<TokenBucket>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let bucket = registry.resolve("shared", now);
                        assert!(bucket.try_consume(1, now));
                        bucket
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(buckets.iter().all(|b| Arc::ptr_eq(b, &buckets[0])));
        // No consume was lost to a duplicate bucket
        assert_eq!(buckets[0].snapshot().available_tokens, 0.0);
    }
}
