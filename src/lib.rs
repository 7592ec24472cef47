//! Tollgate - Per-client rate limiting for HTTP endpoints
//!
//! This crate limits how many requests each client, identified by network
//! address, may issue against a set of protected paths. Every client gets a
//! token bucket that refills continuously; requests that find the bucket empty
//! are answered with `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
