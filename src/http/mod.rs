//! HTTP front end: the rate limit filter and the server that mounts it.

mod layer;
mod products;
mod server;

pub use layer::{RateLimitLayer, RateLimitService, RATE_LIMITED_MESSAGE, UNKNOWN_CLIENT};
pub use server::HttpServer;
