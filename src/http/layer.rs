//! Tower middleware that puts a [`Limiter`] in front of a service.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::ratelimit::{emit_headers, Admission, Limiter};

/// Rate limiting layer for Tower.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<Limiter>,
}

impl RateLimitLayer {
    /// Create a new rate limit layer.
    pub fn new(limiter: Arc<Limiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service.
///
/// Every request ends in exactly one of: the inner service, the limiter's
/// denied handler, or its error handler. Allowed requests reach the inner
/// service with their [`Decision`](crate::ratelimit::Decision) in the request
/// extensions, and both allowed and denied responses carry the rate limit
/// headers. The headers are written once the final response exists and
/// replace any same-named headers the inner service set. Requests with an
/// empty identity pass through untouched.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<Limiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        // Keep the instance that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = request.into_parts();

            let decision = match limiter.check(&parts).await {
                Err(err) => return Ok(limiter.error_handler().on_error(&parts, &err)),
                Ok(Admission::Unlimited) => {
                    return inner.call(Request::from_parts(parts, body)).await;
                }
                Ok(Admission::Limited(decision)) => decision,
            };

            let mut response = if decision.denied {
                limiter.denied_handler().on_denied(&parts, &decision)
            } else {
                let mut request = Request::from_parts(parts, body);
                request.extensions_mut().insert(decision.clone());
                inner.call(request).await?
            };

            emit_headers(response.headers_mut(), limiter.quota(), &decision);
            Ok(response)
        })
    }
}
