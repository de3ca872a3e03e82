//! Per-user fixed-window rate limiting on the shared KV store.

use std::sync::Arc;
use std::time::Duration;

use relay_common::config::RateLimitConfig;
use relay_common::KvStore;

/// Fixed-window request counter.
///
/// The window starts on the first request and is not extended by later ones.
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            kv,
            max_requests,
            window,
        }
    }

    pub fn from_config(kv: Arc<dyn KvStore>, config: &RateLimitConfig) -> Self {
        Self::new(kv, config.max_requests, config.window())
    }

    /// Count one request for `user_id` and report whether it is within the limit.
    ///
    /// Store failures admit the request.
    pub async fn admit(&self, user_id: i64) -> bool {
        let key = format!("ratelimit:{user_id}");

        let count = match self.kv.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Rate limiter store failed, admitting request");
                return true;
            }
        };

        let admitted = count <= i64::from(self.max_requests);
        if count == 1 {
            self.open_window(user_id, &key).await;
        } else if !admitted {
            tracing::debug!(user_id, count, limit = self.max_requests, "Rate limit exceeded");
            // A counter left without a TTL would never reset.
            if matches!(self.kv.ttl(&key).await, Ok(None)) {
                tracing::warn!(user_id, "Rate limit counter has no window, reopening it");
                self.open_window(user_id, &key).await;
            }
        }
        admitted
    }

    async fn open_window(&self, user_id: i64, key: &str) {
        if let Err(e) = self.kv.expire(key, self.window).await {
            tracing::warn!(user_id, error = %e, "Failed to set rate limit window");
        }
    }
}
