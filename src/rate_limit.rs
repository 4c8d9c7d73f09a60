use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

/// Configurable per-route-group limits. All read from environment variables
/// with sensible defaults.
///
/// Environment variables:
/// - `RATE_LIMIT_AUTH` — Bucket capacity for auth attempts (login/register) per IP, refilled over a minute (default: 30)
/// - `RATE_LIMIT_CHAT` — Bucket capacity for chat sends per IP, refilled over a minute (default: 60)
/// - `RATE_LIMIT_SOCIAL` — Bucket capacity for friend/group mutations per IP, refilled over a minute (default: 60)
pub struct RateLimitConfig {
    pub auth_max: usize,
    pub auth_window_secs: u64,
    pub chat_max: usize,
    pub chat_window_secs: u64,
    pub social_max: usize,
    pub social_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_max: 30,
            auth_window_secs: 60,
            chat_max: 60,
            chat_window_secs: 60,
            social_max: 60,
            social_window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_AUTH") {
            if let Ok(n) = val.parse::<usize>() {
                config.auth_max = n;
            }
        }
        if let Ok(val) = env::var("RATE_LIMIT_CHAT") {
            if let Ok(n) = val.parse::<usize>() {
                config.chat_max = n;
            }
        }
        if let Ok(val) = env::var("RATE_LIMIT_SOCIAL") {
            if let Ok(n) = val.parse::<usize>() {
                config.social_max = n;
            }
        }

        config
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter. Each key owns a bucket that holds at most
/// `capacity` tokens and refills steadily at `capacity / window_secs` tokens
/// per second; every allowed request spends one token.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed. Returns true if allowed, false if rate
    /// limited. `key` is typically "group:ip", `capacity` is the burst size,
    /// `window_secs` is how long a full refill takes.
    pub fn check(&self, key: &str, capacity: usize, window_secs: u64) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let capacity = capacity as f64;
        let rate = capacity / window_secs.max(1) as f64;

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return true;
        }
        false
    }
}
