//! Redis-backed distributed lock coordinator.
//!
//! Each canonical resource key becomes one Redis key (`lock:{key}`) set with
//! `SET NX PX` under the lease's fencing token. Keys are always taken in the
//! canonical sorted order; when any key in the set is contended, every key
//! already taken in this attempt is rolled back before backing off, so a
//! failed acquisition never leaves partial locking behind. Release deletes a
//! key only while it still holds this lease's token (check-and-delete
//! script), and release failures are logged rather than propagated: the PX
//! expiry is the safety net.

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use seatlock_core::{Lease, LockCoordinator, LockError, ResourceKey};
use std::time::Duration;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Retry bounds for lock acquisition.
///
/// Defaults mirror the production tuning: 10 attempts, 200 ms apart, with
/// up to 50 ms of jitter so herds of contenders spread out.
#[derive(Debug, Clone)]
pub struct LockRetryPolicy {
    /// Total acquisition attempts before failing closed.
    pub attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Upper bound of the random extra delay added per retry.
    pub jitter: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self { attempts: 10, delay: Duration::from_millis(200), jitter: Duration::from_millis(50) }
    }
}

impl LockRetryPolicy {
    /// Backoff before the next attempt: base delay plus random jitter.
    fn backoff(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.delay;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.delay + Duration::from_millis(extra)
    }
}

/// Redis [`LockCoordinator`].
#[derive(Clone)]
pub struct RedisLockCoordinator {
    conn: ConnectionManager,
    retry: LockRetryPolicy,
}

impl RedisLockCoordinator {
    /// Creates a coordinator over a managed connection with default retry
    /// bounds.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_retry(conn, LockRetryPolicy::default())
    }

    /// Creates a coordinator with explicit retry bounds.
    #[must_use]
    pub const fn with_retry(conn: ConnectionManager, retry: LockRetryPolicy) -> Self {
        Self { conn, retry }
    }

    /// Connects to Redis and wraps the connection in a coordinator.
    ///
    /// # Errors
    ///
    /// [`LockError::Backend`] when the client cannot be created or the
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, LockError> {
        let client =
            redis::Client::open(url).map_err(|err| LockError::Backend(err.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| LockError::Backend(err.to_string()))?;
        Ok(Self::new(conn))
    }

    fn storage_key(key: &ResourceKey) -> String {
        format!("lock:{key}")
    }

    /// Tries to take every key once. On contention or backend failure,
    /// rolls back the keys already taken in this attempt.
    async fn try_acquire_all(
        &self,
        keys: &[ResourceKey],
        token: &str,
        ttl_ms: u64,
    ) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let mut taken: Vec<&ResourceKey> = Vec::with_capacity(keys.len());

        for key in keys {
            let outcome: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
                .arg(Self::storage_key(key))
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await;

            match outcome {
                Ok(Some(_)) => taken.push(key),
                Ok(None) => {
                    self.release_keys(&taken, token).await;
                    return Ok(false);
                }
                Err(err) => {
                    self.release_keys(&taken, token).await;
                    return Err(LockError::Backend(err.to_string()));
                }
            }
        }
        Ok(true)
    }

    async fn release_keys(&self, keys: &[&ResourceKey], token: &str) {
        let script = redis::Script::new(RELEASE_SCRIPT);
        let mut conn = self.conn.clone();
        for key in keys {
            let outcome: Result<i64, redis::RedisError> = script
                .key(Self::storage_key(key))
                .arg(token)
                .invoke_async(&mut conn)
                .await;
            if let Err(err) = outcome {
                tracing::warn!(
                    key = %key,
                    error = %err,
                    "lock release failed; lease TTL will reclaim the key"
                );
            }
        }
    }
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    async fn acquire(&self, keys: &[ResourceKey], ttl: Duration) -> Result<Lease, LockError> {
        let canonical = ResourceKey::canonicalize(keys);
        let lease = Lease::new(canonical.clone());
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        for attempt in 0..self.retry.attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff()).await;
            }

            if self.try_acquire_all(&canonical, lease.token(), ttl_ms).await? {
                tracing::debug!(
                    keys = canonical.len(),
                    attempt,
                    "distributed locks acquired"
                );
                return Ok(lease);
            }
        }

        Err(LockError::Unavailable {
            resources: canonical.iter().map(|key| key.as_str().to_string()).collect(),
        })
    }

    async fn release(&self, lease: Lease) {
        let keys: Vec<&ResourceKey> = lease.keys().iter().collect();
        self.release_keys(&keys, lease.token()).await;
    }
}
