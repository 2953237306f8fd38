//! Idempotency-key classification.
//!
//! Given the prior reservation found under a client-supplied key (if any),
//! decide what a retried `create` call must do. Replaying the exact request
//! never creates a duplicate while the original is live or confirmed, and a
//! dead original never blocks a fresh attempt: its key is cleared inside the
//! new attempt's transaction.

use crate::types::{Reservation, ReservationId, ReservationStatus};
use chrono::{DateTime, Utc};

/// Outcome of classifying a creation request against a prior reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotentOutcome {
    /// No prior reservation holds this key; proceed to locking.
    Novel,
    /// The prior reservation was confirmed: return it with zero remaining
    /// hold time and do no new work.
    AlreadyConfirmed(Reservation),
    /// The prior reservation is still pending and unexpired: return it
    /// unchanged with its remaining TTL and do no new work.
    StillPending {
        /// The live prior reservation.
        reservation: Reservation,
        /// Whole seconds left in its hold window.
        remaining_seconds: u64,
    },
    /// The prior attempt expired or was cancelled: proceed as novel, and
    /// clear the key from the stale row inside the new transaction.
    ReplacedStale {
        /// Row whose `idempotency_key` must be cleared before reuse.
        stale_reservation_id: ReservationId,
    },
}

/// Classifies a creation request by its idempotency-key lookup result.
#[must_use]
pub fn classify(existing: Option<Reservation>, now: DateTime<Utc>) -> IdempotentOutcome {
    let Some(reservation) = existing else {
        return IdempotentOutcome::Novel;
    };

    match reservation.status {
        ReservationStatus::Confirmed => IdempotentOutcome::AlreadyConfirmed(reservation),
        ReservationStatus::Pending if !reservation.is_expired(now) => {
            let remaining_seconds = crate::reservations::remaining_seconds(&reservation, now);
            IdempotentOutcome::StillPending { reservation, remaining_seconds }
        }
        // Pending-but-expired (sweeper hasn't reached it), Expired, Cancelled:
        // the original is dead and must not block a retry.
        _ => IdempotentOutcome::ReplacedStale { stale_reservation_id: reservation.id },
    }
}
