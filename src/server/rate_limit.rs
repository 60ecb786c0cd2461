//! Per-client sliding-window rate limiting.
//!
//! Each client key keeps the timestamps of its recent requests. A request is
//! admitted while fewer than `max_requests` fall inside the window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Rejection with the time until the oldest request leaves the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds for the `Retry-After` header, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after.as_secs_f64().ceil().max(1.0) as u64
    }
}

#[derive(Debug)]
pub struct IpRateLimiter {
    max_requests: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

impl IpRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Admit and record a request from `key`, or report how long to wait.
    pub fn check_and_record(&self, key: &str) -> Result<(), RateLimited> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), RateLimited> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.window;
        let recent = buckets.entry(key.to_string()).or_default();

        recent.retain(|&t| now.duration_since(t) < window);

        if recent.len() >= self.max_requests {
            let oldest = recent.first().copied().unwrap_or(now);
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            tracing::warn!(
                client = %key,
                limit = self.max_requests,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            return Err(RateLimited { retry_after });
        }

        recent.push(now);
        Ok(())
    }

    /// Drop clients with no requests inside the window.
    pub fn prune_stale(&self) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = self.window;
        buckets.retain(|_, recent| {
            recent.retain(|&t| now.duration_since(t) < window);
            !recent.is_empty()
        });
        tracing::debug!(clients = buckets.len(), "Pruned rate limit buckets");
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
