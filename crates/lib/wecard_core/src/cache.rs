//! Shared credential cache with per-key TTLs.
//!
//! Workers run as independent processes, so the production backend is Redis.
//! Every backend failure degrades to a miss: callers fall back to a live fetch.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::{Instant, timeout};
use tracing::warn;

/// Suite ticket pushed by the platform every ten minutes.
pub const SUITE_TICKET: &str = "suite_ticket";

/// Suite-level access token.
pub const SUITE_ACCESS_TOKEN: &str = "suite_access_token";

/// One-time pre-auth code used by the install flow.
pub const PRE_AUTH_CODE: &str = "pre_auth_code";

/// Namespace prefix applied to every Redis key.
const KEY_PREFIX: &str = "wecom:";

/// Upper bound on a single Redis round-trip.
const REDIS_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// Tenant-level access token key.
pub fn corp_access_token_key(corp_id: &str) -> String {
    format!("corp_access_token:{corp_id}")
}

/// JS-SDK ticket key, per corp.
pub fn jsapi_ticket_key(corp_id: &str) -> String {
    format!("jsapi_ticket:{corp_id}")
}

/// OAuth state → redirect URI key.
pub fn oauth_state_key(state: &str) -> String {
    format!("oauth_state:{state}")
}

/// Key-value store for short-lived secrets.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Value for `key`, or `None` when absent, expired, or the backend is down.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` for `ttl`. Failures are logged and swallowed.
    async fn put(&self, key: &str, value: &str, ttl: Duration);

    async fn remove(&self, key: &str);
}

// =============================================================================
// Redis
// =============================================================================

/// Redis-backed cache shared by all workers.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn namespaced(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl CredentialCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        let key = Self::namespaced(key);
        match timeout(REDIS_OP_TIMEOUT, conn.get::<_, Option<String>>(&key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(%key, error = %e, "redis get failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(%key, "redis get timed out, treating as miss");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) {
        let mut conn = self.conn.clone();
        let key = Self::namespaced(key);
        let secs = ttl.as_secs().max(1);
        match timeout(REDIS_OP_TIMEOUT, conn.set_ex::<_, _, ()>(&key, value, secs)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%key, error = %e, "redis set failed"),
            Err(_) => warn!(%key, "redis set timed out"),
        }
    }

    async fn remove(&self, key: &str) {
        let mut conn = self.conn.clone();
        let key = Self::namespaced(key);
        match timeout(REDIS_OP_TIMEOUT, conn.del::<_, ()>(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%key, error = %e, "redis del failed"),
            Err(_) => warn!(%key, "redis del timed out"),
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache for development and tests.
///
/// Expiry uses `tokio::time::Instant`, so paused-clock tests can advance it.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entry = self.entries.get(key)?;
            if Instant::now() < entry.expires_at {
                return Some(entry.value.clone());
            }
        }
        // Guard released above; evict the stale entry.
        self.entries.remove(key);
        None
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}
