//! Availability-cache invalidation seam.
//!
//! The engine's only cache interaction: after every commit that changes
//! seat status for a session, that session's availability snapshot is
//! explicitly invalidated (not merely left to expire). Read-through caching
//! itself lives with the collaborator.

use crate::types::SessionId;
use async_trait::async_trait;

/// Cache collaborator the engine signals after seat-status commits.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    /// Drops the availability snapshot for one session. Best-effort:
    /// implementations log failures and return.
    async fn invalidate(&self, session_id: SessionId);
}
