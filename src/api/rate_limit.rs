//! Rate limiting for API endpoints.
//!
//! Token bucket per client address. The default of 30 requests per minute
//! comes from `RATE_LIMIT_PER_MINUTE`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::ApiError;
use super::middleware::client_ip;
use super::ApiState;

/// Buckets beyond this count trigger a sweep of fully refilled ones.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Token bucket for rate limiting.
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Current number of tokens available
    tokens: f64,
    /// Maximum tokens in the bucket
    max_tokens: f64,
    /// Time of last token refill
    last_refill: Instant,
    /// Token refill rate (tokens per second)
    refill_rate_per_sec: f64,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_period: Duration) -> Self {
        let refill_rate_per_sec = max_tokens as f64 / refill_period.as_secs_f64();
        Self {
            tokens: max_tokens as f64,
            max_tokens: max_tokens as f64,
            last_refill: Instant::now(),
            refill_rate_per_sec,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_sec).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Returns `Err(retry_after_secs)` when the bucket is empty.
    fn try_consume(&mut self) -> Result<(), u32> {
        self.refill(Instant::now());

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let seconds_until_refill = (1.0 - self.tokens) / self.refill_rate_per_sec;
            Err((seconds_until_refill.ceil() as u32).max(1))
        }
    }

    fn is_full(&self) -> bool {
        self.tokens >= self.max_tokens
    }
}

/// Rate limiter using token bucket algorithm.
///
/// Each key (the client address) has its own bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    max_tokens: u32,
    refill_period: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// - `max_tokens`: Maximum requests allowed in the refill period
    /// - `refill_period`: Time period for full token bucket refill
    pub fn new(max_tokens: u32, refill_period: Duration) -> Self {
        Self { buckets: Arc::new(Mutex::new(HashMap::new())), max_tokens, refill_period }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Check if request is allowed under rate limit.
    ///
    /// # Returns
    /// - `Ok(())` if request allowed
    /// - `Err(retry_after_secs)` if rate limited
    pub async fn check_rate_limit(&self, key: &str) -> Result<(), u32> {
        let mut buckets = self.buckets.lock().await;

        if buckets.len() >= MAX_TRACKED_CLIENTS && !buckets.contains_key(key) {
            let now = Instant::now();
            buckets.retain(|_, bucket| {
                bucket.refill(now);
                !bucket.is_full()
            });
            debug!(remaining = buckets.len(), "Pruned idle rate limit buckets");
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_tokens, self.refill_period));

        match bucket.try_consume() {
            Ok(()) => {
                debug!(
                    key = %key,
                    remaining_tokens = bucket.tokens as u32,
                    "Rate limit check passed"
                );
                Ok(())
            }
            Err(retry_after) => {
                warn!(
                    key = %key,
                    retry_after_seconds = retry_after,
                    "Rate limit exceeded"
                );
                Err(retry_after)
            }
        }
    }
}

/// Apply the per-client limit, answering 429 with `Retry-After` when exceeded.
pub async fn enforce_rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_ip(&request, state.trust_forwarded_for)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Err(retry_after) = state.rate_limiter.check_rate_limit(&key).await {
        metrics::counter!("http_requests_rejected_total", "reason" => "rate_limit").increment(1);
        return Err(ApiError::too_many_requests(retry_after));
    }

    Ok(next.run(request).await)
}
