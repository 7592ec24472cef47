//! Tower middleware that applies the rate limiter to protected paths.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::{header, HeaderName, HeaderValue, Request, StatusCode};
use tower::{Layer, Service};
use tracing::trace;

use crate::config::RateLimitSettings;
use crate::ratelimit::{Decision, RateLimiter};

/// Body sent with every 429 response.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests - wait and try again.";

/// Key used when the client address cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Which requests are rate limited and how their client is identified.
#[derive(Debug, Clone)]
struct Scope {
    protected_prefixes: Vec<String>,
    trust_forwarded_headers: bool,
}

impl Scope {
    fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn client_key<B>(&self, req: &Request<B>) -> String {
        if self.trust_forwarded_headers {
            if let Some(ip) = forwarded_ip(req) {
                return ip.to_string();
            }
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Layer that wraps services in a [`RateLimitService`].
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    scope: Arc<Scope>,
}

impl RateLimitLayer {
    /// Create a layer enforcing `limiter` on the paths listed in `settings`.
    pub fn new(limiter: Arc<RateLimiter>, settings: &RateLimitSettings) -> Self {
        Self {
            limiter,
            scope: Arc::new(Scope {
                protected_prefixes: settings.protected_prefixes.clone(),
                trust_forwarded_headers: settings.trust_forwarded_headers,
            }),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            scope: Arc::clone(&self.scope),
        }
    }
}

/// Middleware that forwards allowed requests and answers the rest with `429 Too Many Requests`.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    scope: Arc<Scope>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let path = req.uri().path();
        if !self.scope.is_protected(path) {
            trace!(path = %path, "Path not rate limited");
            return Box::pin(self.inner.call(req));
        }

        let key = self.scope.client_key(&req);
        let decision = self.limiter.check(&key);

        if !decision.allowed {
            return Box::pin(futures::future::ready(Ok(too_many_requests(&decision))));
        }

        let limit = self.limiter.policy().capacity();
        let remaining = decision.remaining;
        let future = self.inner.call(req);

        Box::pin(async move {
            let mut response = future.await?;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
            Ok(response)
        })
    }
}

fn too_many_requests(decision: &Decision) -> Response {
    let retry_after = decision
        .retry_after
        .map(|wait| wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0)))
        .unwrap_or(1)
        .max(1);

    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (header::RETRY_AFTER, HeaderValue::from(retry_after)),
            (X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining)),
        ],
        RATE_LIMITED_MESSAGE,
    )
        .into_response()
}

/// Client address from `X-Forwarded-For` (first hop) or `X-Real-IP`.
fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for") {
        let first = forwarded_for.to_str().ok()?.split(',').next()?;
        return first.trim().parse().ok();
    }

    req.headers()
        .get("x-real-ip")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
