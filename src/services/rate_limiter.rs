//! Sliding-window rate limiting over the cache layer
//!
//! Counters live in Redis sorted sets keyed by a hash of the caller's
//! anonymous identifier, scoped per route class. When the cache is down the
//! limiter fails open and the bypass is audited.

use sha2::{Digest, Sha256};

use crate::cache::Cache;

/// Route classes with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Authorize,
    Token,
    Introspect,
    Auth,
    Keys,
    General,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Authorize => "authorize",
            RouteClass::Token => "token",
            RouteClass::Introspect => "introspect",
            RouteClass::Auth => "auth",
            RouteClass::Keys => "keys",
            RouteClass::General => "general",
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        match self {
            RouteClass::Authorize => RateLimitConfig::new(30, 60),
            RouteClass::Token => RateLimitConfig::new(20, 60),
            RouteClass::Introspect => RateLimitConfig::new(120, 60),
            RouteClass::Auth => RateLimitConfig::new(10, 60),
            RouteClass::Keys => RateLimitConfig::new(30, 60),
            RouteClass::General => RateLimitConfig::new(100, 60),
        }
    }
}

/// Rate limit configuration for a route class
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: i64,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: i64, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: i64 },
    Denied { retry_after_seconds: u64 },
    /// Cache unavailable: fail open, audited by the caller.
    Bypassed,
}

/// Service for rate limiting
#[derive(Clone)]
pub struct RateLimiterService {
    cache: Cache,
}

impl RateLimiterService {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Count this request against the window and decide.
    pub async fn check_and_increment(
        &self,
        identifier: &str,
        class: RouteClass,
    ) -> RateLimitDecision {
        let config = class.config();
        let key = format!("ratelimit:{}:{}", class.as_str(), hash_identifier(identifier));

        match self
            .cache
            .sliding_window_count(&key, config.window_seconds)
            .await
        {
            Some(count) if count <= config.max_requests => RateLimitDecision::Allowed {
                remaining: (config.max_requests - count).max(0),
            },
            Some(_) => RateLimitDecision::Denied {
                retry_after_seconds: config.window_seconds,
            },
            None => RateLimitDecision::Bypassed,
        }
    }
}

/// Hash the anonymous identifier so raw session ids and key prefixes never
/// become cache keys.
pub fn hash_identifier(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_classes_have_distinct_keys() {
        assert_ne!(RouteClass::Token.as_str(), RouteClass::Authorize.as_str());
    }

    #[test]
    fn auth_is_strictest_class() {
        let auth = RouteClass::Auth.config();
        for class in [
            RouteClass::Authorize,
            RouteClass::Token,
            RouteClass::Introspect,
            RouteClass::Keys,
            RouteClass::General,
        ] {
            assert!(auth.max_requests <= class.config().max_requests);
        }
    }

    #[test]
    fn identifier_hashing_is_stable_and_opaque() {
        let h = hash_identifier("session-abc123");
        assert_eq!(h, hash_identifier("session-abc123"));
        assert_eq!(h.len(), 32);
        assert!(!h.contains("session"));
    }

    // With no cache the limiter must fail open.
    #[tokio::test]
    async fn cache_down_bypasses_limit() {
        let limiter = RateLimiterService::new(Cache::disabled());
        let decision = limiter
            .check_and_increment("anonymous", RouteClass::Token)
            .await;
        assert_eq!(decision, RateLimitDecision::Bypassed);
    }
}
