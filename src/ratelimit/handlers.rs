//! What a limited request turns into: rate limit headers, and the responses
//! for denied and failed checks.

use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

use super::limiter::{Decision, LimitError};
use super::quota::Quota;

pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
pub const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");

/// Body of the default denial response.
pub const TOO_MANY_REQUESTS_BODY: &str = "Too Many Requests";
/// Body of the default error response.
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// Publish limit, reset time (epoch seconds) and remaining count, replacing
/// any values already present.
pub fn emit_headers(headers: &mut HeaderMap, quota: &Quota, decision: &Decision) {
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(quota.limit()));
    headers.insert(
        X_RATE_LIMIT_RESET,
        HeaderValue::from(decision.resets_at.timestamp()),
    );
    headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
}

/// Builds the response for a request whose rate limit check failed, either
/// because no identity could be resolved or the counter store was
/// unreachable.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, parts: &Parts, error: &LimitError) -> Response;
}

/// Builds the response for a request that exceeded its quota.
pub trait DeniedHandler: Send + Sync {
    fn on_denied(&self, parts: &Parts, decision: &Decision) -> Response;
}

/// Logs the failure and answers `500 Internal Server Error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn on_error(&self, parts: &Parts, err: &LimitError) -> Response {
        error!(
            method = %parts.method,
            path = %parts.uri.path(),
            error = %err,
            "Rate limit check failed"
        );
        (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
    }
}

/// Answers `429 Too Many Requests`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeniedHandler;

impl DeniedHandler for DefaultDeniedHandler {
    fn on_denied(&self, _parts: &Parts, _decision: &Decision) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS_BODY).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use axum::http::Request;
    use chrono::DateTime;

    fn decision(counter: u64, quota: &Quota) -> Decision {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Decision::new(quota, now, "client".to_string(), counter)
    }

    fn parts() -> Parts {
        Request::get("/resource").body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_emit_headers() {
        let quota = Quota::per_seconds(3, 60).unwrap();
        let mut headers = HeaderMap::new();

        emit_headers(&mut headers, &quota, &decision(1, &quota));

        assert_eq!(headers["X-Rate-Limit-Limit"], "3");
        assert_eq!(headers["X-Rate-Limit-Remaining"], "2");
        assert_eq!(headers["X-Rate-Limit-Reset"], "1700000040");
    }

    #[test]
    fn test_emit_headers_overwrites_and_never_negative() {
        let quota = Quota::per_seconds(3, 60).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from_static("99"));

        emit_headers(&mut headers, &quota, &decision(5, &quota));

        assert_eq!(headers.get_all(X_RATE_LIMIT_REMAINING).iter().count(), 1);
        assert_eq!(headers["X-Rate-Limit-Remaining"], "0");
    }

    #[test]
    fn test_default_denied_handler() {
        let quota = Quota::per_seconds(1, 1).unwrap();
        let response = DefaultDeniedHandler.on_denied(&parts(), &decision(2, &quota));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_default_error_handler() {
        let err = LimitError::Store(StoreError::Unavailable("connection refused".to_string()));
        let response = DefaultErrorHandler.on_error(&parts(), &err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
