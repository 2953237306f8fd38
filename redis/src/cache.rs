//! Redis availability-cache invalidator.
//!
//! Deletes `session:{id}:availability` after seat-status commits. Failures
//! are logged and swallowed: a missed invalidation only shortens to the
//! snapshot's own TTL, and it must never mask a committed transaction.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use seatlock_core::{AvailabilityCache, SessionId};

/// Redis [`AvailabilityCache`] collaborator.
#[derive(Clone)]
pub struct RedisAvailabilityCache {
    conn: ConnectionManager,
}

impl RedisAvailabilityCache {
    /// Creates an invalidator over a managed connection.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn snapshot_key(session_id: SessionId) -> String {
        format!("session:{session_id}:availability")
    }
}

#[async_trait]
impl AvailabilityCache for RedisAvailabilityCache {
    async fn invalidate(&self, session_id: SessionId) {
        let key = Self::snapshot_key(session_id);
        let mut conn = self.conn.clone();
        let outcome: Result<i64, redis::RedisError> = conn.del(&key).await;
        match outcome {
            Ok(_) => tracing::debug!(session_id = %session_id, "availability snapshot invalidated"),
            Err(err) => tracing::warn!(
                session_id = %session_id,
                error = %err,
                "availability invalidation failed; snapshot will age out on its own TTL"
            ),
        }
    }
}
