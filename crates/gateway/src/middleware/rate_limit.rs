//! Rate limiting
//!
//! Two layers: a process-global token bucket applied as middleware, and
//! the per-identifier windowed counter backed by the cache adapter that
//! the chat handler consults before starting a turn.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use loreforge_common::cache::{CacheStore, CacheStoreExt, RateLimitDecision};
use loreforge_common::config::RateLimitConfig;
use loreforge_common::errors::{AppError, Result};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-global rate limiter using the governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Create the global token bucket
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<GlobalRateLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second.max(1)).expect("nonzero"))
        .allow_burst(NonZeroU32::new(burst.max(1)).expect("nonzero"));

    Arc::new(RateLimiter::direct(quota))
}

/// Global rate limiting middleware
pub async fn rate_limit_middleware(
    limiter: Arc<GlobalRateLimiter>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!("Global rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}

/// Per-identifier check against the cache counter
///
/// Short-circuits the request with a structured RateLimited error when
/// the window is exhausted.
pub async fn check_identifier(
    cache: &dyn CacheStore,
    config: &RateLimitConfig,
    identifier: &str,
) -> Result<RateLimitDecision> {
    if !config.enabled {
        return Ok(RateLimitDecision {
            allowed: true,
            remaining: config.requests_per_window,
        });
    }

    let decision = cache
        .rate_limit(identifier, config.requests_per_window, config.window_secs)
        .await?;

    if !decision.allowed {
        tracing::warn!(identifier = %identifier, "Per-identifier rate limit exceeded");
        return Err(AppError::RateLimited {
            identifier: identifier.to_string(),
        });
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::cache::MemoryCache;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(100, 200);
        assert!(limiter.check().is_ok());
    }

    #[tokio::test]
    async fn test_identifier_counter_short_circuits() {
        let cache = MemoryCache::new();
        let config = RateLimitConfig {
            requests_per_window: 2,
            window_secs: 60,
            ..RateLimitConfig::default()
        };

        assert!(check_identifier(&cache, &config, "session-1").await.is_ok());
        assert!(check_identifier(&cache, &config, "session-1").await.is_ok());
        let third = check_identifier(&cache, &config, "session-1").await;
        assert!(matches!(third, Err(AppError::RateLimited { .. })));

        // A different identifier has its own window
        assert!(check_identifier(&cache, &config, "session-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_config_always_allows() {
        let cache = MemoryCache::new();
        let config = RateLimitConfig {
            requests_per_window: 1,
            enabled: false,
            ..RateLimitConfig::default()
        };
        for _ in 0..5 {
            assert!(check_identifier(&cache, &config, "x").await.is_ok());
        }
    }
}
