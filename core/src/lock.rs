//! Distributed mutual-exclusion seam.
//!
//! Resource keys are namespaced strings (`seat:{uuid}`,
//! `reservation:{uuid}`). Coordinators MUST acquire in the canonical order
//! produced by [`ResourceKey::canonicalize`] (lexicographic, duplicates
//! removed) regardless of caller-supplied order. Two requests contending on
//! overlapping sets then always collide in the same order, so one strictly
//! precedes the other instead of deadlocking.

use crate::types::{ReservationId, SeatId};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A namespaced resource key eligible for distributed locking.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Key guarding one seat.
    #[must_use]
    pub fn seat(id: SeatId) -> Self {
        Self(format!("seat:{id}"))
    }

    /// Key guarding one reservation.
    #[must_use]
    pub fn reservation(id: ReservationId) -> Self {
        Self(format!("reservation:{id}"))
    }

    /// The key's string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical acquisition order: lexicographically sorted, deduplicated.
    ///
    /// This is the deadlock-prevention invariant; every coordinator calls it
    /// before touching the first resource.
    #[must_use]
    pub fn canonicalize(keys: &[Self]) -> Vec<Self> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        sorted
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A granted time-bounded lock over a set of resource keys.
///
/// Holds the fencing token the coordinator needs for a safe release; the
/// keys expire on their own TTL if release never arrives.
#[derive(Clone, Debug)]
pub struct Lease {
    token: String,
    keys: Vec<ResourceKey>,
}

impl Lease {
    /// Creates a lease for coordinator implementations.
    #[must_use]
    pub fn new(keys: Vec<ResourceKey>) -> Self {
        Self { token: Uuid::new_v4().to_string(), keys }
    }

    /// The fencing token identifying this grant.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The canonically ordered keys this lease covers.
    #[must_use]
    pub fn keys(&self) -> &[ResourceKey] {
        &self.keys
    }
}

/// Lock acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Bounded retries exhausted; no partial locking is left held.
    #[error("lock unavailable after bounded retries: {}", resources.join(", "))]
    Unavailable {
        /// The contended canonical keys.
        resources: Vec<String>,
    },
    /// The lock backend itself failed.
    #[error("lock backend error: {0}")]
    Backend(String),
}

impl From<LockError> for crate::error::Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Unavailable { resources } => Self::LockUnavailable { resources },
            LockError::Backend(message) => Self::LockUnavailable { resources: vec![message] },
        }
    }
}

/// Mutual exclusion over arbitrary sets of resource keys.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Acquires every key (in canonical order) or fails with nothing held.
    ///
    /// Blocks/retries internally up to a bounded attempt count; the TTL must
    /// exceed the guarded transaction's expected duration with margin.
    ///
    /// # Errors
    ///
    /// [`LockError::Unavailable`] when retries are exhausted,
    /// [`LockError::Backend`] when the lock store itself fails.
    async fn acquire(&self, keys: &[ResourceKey], ttl: Duration) -> Result<Lease, LockError>;

    /// Releases a lease, best-effort and unconditional on the caller's exit
    /// path. Failures are logged by the implementation, never propagated:
    /// the TTL is the safety net.
    async fn release(&self, lease: Lease);
}
