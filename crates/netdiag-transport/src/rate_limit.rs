//! Per-client request rate limiting for the server endpoint.
//!
//! Token bucket keyed by peer IP. The defaults allow 10 requests per minute
//! with no burst beyond a single request, so a client can open one WebSocket
//! every six seconds.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Rate limiting configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests replenished per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests a client may make back to back
    #[serde(default = "default_burst")]
    pub burst: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_max_requests() -> u32 {
    10
}

const fn default_window_secs() -> u64 {
    60
}

const fn default_burst() -> u32 {
    1
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            burst: default_burst(),
        }
    }
}

impl RateLimitConfig {
    /// Returns the window duration.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst.max(1))
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Requests left before the client is throttled
        remaining: u32,
    },
    /// Request is denied
    Denied {
        /// When the client can retry
        retry_after: Duration,
    },
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket rate limiter keyed by client IP.
///
/// Requests without a known peer address share one bucket.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<Option<IpAddr>, TokenBucket>,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Checks if a request from `client` is allowed, consuming a token if so.
    pub fn check(&self, client: Option<IpAddr>) -> RateLimitResult {
        self.check_at(client, Instant::now())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn check_at(&self, client: Option<IpAddr>, now: Instant) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
            };
        }

        let capacity = self.config.capacity();
        let window = self.config.window().as_secs_f64();
        let rate = f64::from(self.config.max_requests);

        let mut bucket = self.buckets.entry(client).or_insert_with(|| TokenBucket {
            tokens: capacity,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update);
        if window > 0.0 {
            bucket.tokens = (elapsed.as_secs_f64() / window).mul_add(rate, bucket.tokens);
        } else {
            bucket.tokens = capacity;
        }
        bucket.tokens = bucket.tokens.min(capacity);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitResult::Allowed {
                remaining: bucket.tokens as u32,
            }
        } else {
            let needed = 1.0 - bucket.tokens;
            let retry_after = Duration::try_from_secs_f64(needed / rate * window)
                .unwrap_or_else(|_| self.config.window());
            RateLimitResult::Denied { retry_after }
        }
    }

    /// Drops buckets idle for more than two windows.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.window();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < window * 2);
    }

    /// Number of clients currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate limit middleware.
///
/// The peer address comes from [`ConnectInfo`], so serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// # Example
/// ```ignore
/// let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
/// let app = create_ws_router(executor)
///     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit));
/// ```
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match limiter.check(client) {
        RateLimitResult::Allowed { .. } => next.run(request).await,
        RateLimitResult::Denied { retry_after } => {
            tracing::warn!(?client, ?retry_after, "Rate limit exceeded");
            too_many_requests(retry_after)
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let body = Json(serde_json::json!({ "error": "too many requests" }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(secs));
    response
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn client(last: u8) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[test]
    fn test_second_request_in_window_denied() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();

        assert_eq!(
            limiter.check_at(client(1), now),
            RateLimitResult::Allowed { remaining: 0 }
        );
        let RateLimitResult::Denied { retry_after } =
            limiter.check_at(client(1), now + Duration::from_secs(1))
        else {
            panic!("second request should be throttled");
        };
        assert!(retry_after > Duration::from_secs(4) && retry_after < Duration::from_secs(6));
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at(client(1), now),
            RateLimitResult::Allowed { .. }
        ));
        // 10 per minute refills one token every six seconds.
        assert!(matches!(
            limiter.check_at(client(1), now + Duration::from_secs(7)),
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(client(1), now + Duration::from_secs(8)),
            RateLimitResult::Denied { .. }
        ));
    }

    #[test]
    fn test_separate_clients() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at(client(1), now),
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(client(2), now),
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(None, now),
            RateLimitResult::Allowed { .. }
        ));
        assert_eq!(limiter.tracked_clients(), 3);
    }

    #[test]
    fn test_burst_allows_back_to_back_requests() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 3,
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        for _ in 0..3 {
            assert!(matches!(
                limiter.check_at(client(1), now),
                RateLimitResult::Allowed { .. }
            ));
        }
        assert!(matches!(
            limiter.check_at(client(1), now),
            RateLimitResult::Denied { .. }
        ));
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        for _ in 0..100 {
            assert!(matches!(
                limiter.check(client(1)),
                RateLimitResult::Allowed { .. }
            ));
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_cleanup_keeps_recent_clients() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.check(client(1));
        limiter.cleanup();
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: RateLimitConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RateLimitConfig::default());
        assert_eq!(config.window(), Duration::from_secs(60));
    }
}
