//! Rate-limiting middleware
//!
//! Sliding-window counters keyed by a hash of the caller's anonymous
//! identifier, scoped per route class. When the cache is unavailable the
//! limiter fails open and the bypass is audited.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::config::AppState;
use crate::error::ErrorResponse;
use crate::models::{AuditAction, AuditEntry};
use crate::services::{AuditService, RateLimitDecision, RateLimiterService, RouteClass};

/// Derive the anonymous identifier for a request: explicit session header,
/// bearer-token prefix, API-key prefix, or `"anonymous"`.
fn anonymous_identifier(request: &Request<Body>) -> String {
    if let Some(session) = request
        .headers()
        .get("session-id")
        .and_then(|v| v.to_str().ok())
    {
        return format!("session:{session}");
    }

    if let Some(bearer) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        let prefix = &bearer[..16.min(bearer.len())];
        return format!("bearer:{prefix}");
    }

    if let Some(key) = request.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        let prefix = &key[..12.min(key.len())];
        return format!("key:{prefix}");
    }

    "anonymous".to_string()
}

/// Build a rate-limiting middleware for one route class.
///
/// Shaped like a `from_fn` middleware factory so each route class can carry
/// its own limits while sharing the cache-backed limiter.
pub fn rate_limit(
    state: AppState,
    class: RouteClass,
) -> impl Fn(
    Request<Body>,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
       + Clone {
    move |request: Request<Body>, next: Next| {
        let state = state.clone();
        Box::pin(async move {
            let limiter = RateLimiterService::new(state.cache.clone());
            let identifier = anonymous_identifier(&request);

            match limiter.check_and_increment(&identifier, class).await {
                RateLimitDecision::Allowed { .. } => next.run(request).await,
                RateLimitDecision::Denied {
                    retry_after_seconds,
                } => {
                    tracing::warn!(class = class.as_str(), "rate limit exceeded");
                    let body = Json(ErrorResponse {
                        error: "rate_limited".to_string(),
                        message: "Too many requests".to_string(),
                        status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    });
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [(header::RETRY_AFTER, retry_after_seconds.to_string())],
                        body,
                    )
                        .into_response()
                }
                RateLimitDecision::Bypassed => {
                    // Cache down: fail open, but leave a trace.
                    AuditService::new(state.pool.clone()).record(
                        AuditAction::RateLimitBypassed,
                        AuditEntry {
                            details: Some(serde_json::json!({ "route_class": class.as_str() })),
                            ..AuditEntry::ok()
                        },
                    );
                    next.run(request).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_headers(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn session_header_wins() {
        let request = request_with_headers(&[
            ("session-id", "abc"),
            ("authorization", "Bearer tok"),
        ]);
        assert_eq!(anonymous_identifier(&request), "session:abc");
    }

    #[test]
    fn bearer_prefix_used_not_whole_token() {
        let request = request_with_headers(&[(
            "authorization",
            "Bearer aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        )]);
        assert_eq!(anonymous_identifier(&request), "bearer:aaaaaaaaaaaaaaaa");
    }

    #[test]
    fn api_key_prefix_used() {
        let request = request_with_headers(&[("x-api-key", "sk_live_0123abcdef")]);
        assert_eq!(anonymous_identifier(&request), "key:sk_live_0123");
    }

    #[test]
    fn falls_back_to_anonymous() {
        let request = request_with_headers(&[]);
        assert_eq!(anonymous_identifier(&request), "anonymous");
    }
}
