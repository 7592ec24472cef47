//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::RateLimitLayer;
use super::products;
use crate::config::RateLimitSettings;
use crate::error::{Result, TollgateError};
use crate::ratelimit::RateLimiter;

/// HTTP server exposing the protected routes behind the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Path scope and client identification settings
    settings: RateLimitSettings,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>, settings: RateLimitSettings) -> Self {
        Self {
            addr,
            rate_limiter,
            settings,
        }
    }

    /// Build the application router.
    ///
    /// Every request passes through the rate limit layer; only the configured
    /// prefixes are counted.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(products::routes())
            .route("/health", get(health))
            .layer(RateLimitLayer::new(
                Arc::clone(&self.rate_limiter),
                &self.settings,
            ))
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TollgateError::Io(e)
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            capacity = self.rate_limiter.policy().capacity(),
            refill_period = ?self.rate_limiter.policy().refill_period(),
            "Starting HTTP server"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Server(e.to_string())
        })
    }
}

async fn health() -> &'static str {
    "ok"
}
