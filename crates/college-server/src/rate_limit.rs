use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use college_shared::{Identity, UserId};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::EngineError;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-user token buckets, held in process memory. Each engine instance
/// keeps its own independent limits.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<UserId, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    /// Sustained `rate` tokens per second with a burst of twice that,
    /// never less than one whole request.
    pub fn per_user(rate: f64) -> Self {
        Self::new(rate, (rate * 2.0).max(1.0))
    }

    pub async fn check(&self, user: &UserId) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(user.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

/// Must run after [`crate::auth::require_identity`]; unauthenticated
/// requests pass through untouched.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let user = req.extensions().get::<Identity>().map(|i| i.id.clone());

    if let Some(user) = user {
        if !limiter.check(&user).await {
            warn!(user = %user, path = %req.uri().path(), "Rate limit exceeded");
            return EngineError::RateLimited.into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_allows_burst() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let user = UserId::from("s1");

        for _ in 0..5 {
            assert!(limiter.check(&user).await);
        }

        assert!(!limiter.check(&user).await);
    }

    #[tokio::test]
    async fn test_rate_limiter_different_users() {
        let limiter = RateLimiter::new(10.0, 2.0);
        let a = UserId::from("s1");
        let b = UserId::from("s2");

        assert!(limiter.check(&a).await);
        assert!(limiter.check(&a).await);
        assert!(!limiter.check(&a).await);

        assert!(limiter.check(&b).await);
    }

    #[tokio::test]
    async fn test_per_user_burst_is_double_rate() {
        let limiter = RateLimiter::per_user(0.001);
        let user = UserId::from("s1");
        // burst floors at one request
        assert!(limiter.check(&user).await);
        assert!(!limiter.check(&user).await);

        let limiter = RateLimiter::per_user(2.0);
        for _ in 0..4 {
            assert!(limiter.check(&user).await);
        }
        assert!(!limiter.check(&user).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(10.0, 5.0);
        assert!(limiter.check(&UserId::from("s1")).await);

        limiter.purge_stale(0.0).await;

        let buckets = limiter.buckets.lock().await;
        assert!(buckets.is_empty());
    }
}
