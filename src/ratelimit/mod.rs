//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod limiter;
mod policy;
mod registry;

pub use bucket::{BucketSnapshot, Decision, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::RateLimiter;
pub use policy::RateLimitPolicy;
pub use registry::BucketRegistry;
