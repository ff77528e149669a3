//! Fixed-window request throttling over an injected TTL store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Key/value counters that expire on their own.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increments the counter for `key`, opening a new window of length
    /// `ttl` when none is live at `now`.
    async fn hit(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> WindowState;
}

#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<String, WindowState>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> WindowState {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, w| w.reset_at > now);

        let window = entries
            .entry(key.to_string())
            .or_insert(WindowState { count: 0, reset_at: now + ttl });
        window.count = window.count.saturating_add(1);
        *window
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, max_requests: u32, window: Duration) -> Self {
        Self { store, clock, max_requests, window }
    }

    pub async fn check(&self, action: &str, user_id: Uuid) -> EngineResult<()> {
        let key = format!("{action}:{user_id}");
        let state = self.store.hit(&key, self.window, self.clock.now()).await;
        if state.count > self.max_requests {
            tracing::debug!(%user_id, action, "rate limited");
            return Err(EngineError::LimitExceeded(format!(
                "too many requests, retry after {}",
                state.reset_at.to_rfc3339()
            )));
        }
        Ok(())
    }
}
