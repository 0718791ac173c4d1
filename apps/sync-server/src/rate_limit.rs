//! Per-user fixed-window rate limiting for the write endpoints.
//!
//! Counters live behind [`CounterStore`] so a shared store can replace the
//! in-process [`ShardedCounterStore`] when the server runs as several
//! replicas.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;
use crate::error::ApiError;

/// A shard is swept of stale windows once it holds this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// Result of counting one request against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Keyed counters with a bounded lifetime per window.
pub trait CounterStore: Send + Sync {
    /// Count one hit for `key` unless `limit` hits already landed in the
    /// current window.
    fn try_acquire(&self, key: &str, limit: u32, window: Duration, now: Instant) -> Acquire;

    /// Drop windows that ended before `now`. Returns how many were dropped.
    fn prune(&self, now: Instant) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    window: Duration,
    count: u32,
}

impl RateWindow {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= self.window
    }
}

/// In-process store split across independently locked shards.
pub struct ShardedCounterStore {
    shards: Vec<Mutex<HashMap<String, RateWindow>>>,
}

impl ShardedCounterStore {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        ShardedCounterStore { shards }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, RateWindow>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}

impl CounterStore for ShardedCounterStore {
    fn try_acquire(&self, key: &str, limit: u32, window: Duration, now: Instant) -> Acquire {
        let mut guard = self.shard(key).lock().unwrap_or_else(PoisonError::into_inner);

        if guard.len() >= PRUNE_THRESHOLD {
            guard.retain(|_, entry| !entry.expired(now));
        }

        let entry = guard.entry(key.to_string()).or_insert(RateWindow {
            started_at: now,
            window,
            count: 0,
        });

        if entry.expired(now) {
            entry.started_at = now;
            entry.window = window;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after = entry.window.saturating_sub(now.duration_since(entry.started_at));
            return Acquire::Limited { retry_after };
        }

        entry.count += 1;
        Acquire::Allowed {
            remaining: limit - entry.count,
        }
    }

    fn prune(&self, now: Instant) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut guard = shard.lock().unwrap_or_else(PoisonError::into_inner);
                let before = guard.len();
                guard.retain(|_, entry| !entry.expired(now));
                before - guard.len()
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedEndpoint {
    Sync,
    BatchDelete,
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::BatchDelete => "batch_delete",
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    window: Duration,
    sync_limit: u32,
    batch_delete_limit: u32,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, settings: &RateLimitSettings) -> Self {
        RateLimiter {
            store,
            window: settings.window(),
            sync_limit: settings.sync_per_window,
            batch_delete_limit: settings.batch_delete_per_window,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(Arc::new(ShardedCounterStore::new(settings.shards)), settings)
    }

    pub fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), ApiError> {
        let limit = match endpoint {
            ProtectedEndpoint::Sync => self.sync_limit,
            ProtectedEndpoint::BatchDelete => self.batch_delete_limit,
        };
        let key = format!("{}:{}", endpoint.label(), user_id);

        match self.store.try_acquire(&key, limit, self.window, Instant::now()) {
            Acquire::Allowed { .. } => Ok(()),
            Acquire::Limited { retry_after } => {
                let retry_after_secs = ceil_secs(retry_after);
                tracing::warn!(
                    endpoint = endpoint.label(),
                    user = user_fingerprint(user_id),
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                Err(ApiError::too_many_requests(
                    "rate limit exceeded, retry later",
                    retry_after_secs,
                ))
            }
        }
    }

    pub fn prune(&self) -> usize {
        self.store.prune(Instant::now())
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_blocks_after_limit_until_window_ends() {
        let store = ShardedCounterStore::new(4);
        let t0 = Instant::now();

        assert_eq!(
            store.try_acquire("sync:a", 2, WINDOW, t0),
            Acquire::Allowed { remaining: 1 }
        );
        assert_eq!(
            store.try_acquire("sync:a", 2, WINDOW, t0),
            Acquire::Allowed { remaining: 0 }
        );
        assert_eq!(
            store.try_acquire("sync:a", 2, WINDOW, t0 + Duration::from_secs(20)),
            Acquire::Limited {
                retry_after: Duration::from_secs(40)
            }
        );

        // Other keys are independent.
        assert!(matches!(
            store.try_acquire("sync:b", 2, WINDOW, t0),
            Acquire::Allowed { .. }
        ));

        assert!(matches!(
            store.try_acquire("sync:a", 2, WINDOW, t0 + WINDOW),
            Acquire::Allowed { remaining: 1 }
        ));
    }

    #[test]
    fn test_prune_drops_expired_windows() {
        let store = ShardedCounterStore::new(2);
        let t0 = Instant::now();
        store.try_acquire("sync:a", 5, WINDOW, t0);
        store.try_acquire("sync:b", 5, Duration::from_secs(600), t0);

        assert_eq!(store.prune(t0 + Duration::from_secs(61)), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_limiter_maps_to_too_many_requests() {
        let settings = RateLimitSettings {
            sync_per_window: 1,
            batch_delete_per_window: 3,
            ..RateLimitSettings::default()
        };
        let limiter = RateLimiter::from_settings(&settings);

        limiter.check(ProtectedEndpoint::Sync, "user-a").unwrap();
        let err = limiter.check(ProtectedEndpoint::Sync, "user-a").unwrap_err();
        match err {
            ApiError::TooManyRequests(_, secs) => assert!((1..=60).contains(&secs)),
            other => panic!("unexpected error: {:?}", other),
        }

        // Endpoints count separately.
        limiter.check(ProtectedEndpoint::BatchDelete, "user-a").unwrap();
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::ZERO), 1);
    }
}
