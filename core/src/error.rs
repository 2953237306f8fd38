//! Error taxonomy for the reservation engine.
//!
//! Business conflicts are values, not control-flow exceptions: every
//! operation returns `Result<_, Error>` and callers branch on the kind.
//! [`Error::is_retryable`] separates transient contention (`SeatUnavailable`,
//! `LockUnavailable`) from permanent failures a retry cannot fix.

use crate::types::ReservationStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Engine error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed input; the caller's fault, detected before any lock is taken.
    #[error("validation failed: {0}")]
    Validation(String),

    /// One or more targeted seats are not in `Available` status.
    #[error("seats not available: {}", seats.join(", "))]
    SeatUnavailable {
        /// Display labels of the offending seats.
        seats: Vec<String>,
    },

    /// The request targets seats belonging to more than one session.
    #[error("all seats must belong to the same session")]
    CrossSessionRequest,

    /// Distributed lock acquisition exhausted its bounded retries.
    #[error("unable to acquire locks for: {}", resources.join(", "))]
    LockUnavailable {
        /// Canonical resource keys that could not be locked.
        resources: Vec<String>,
    },

    /// The reservation is not in a confirmable state.
    #[error("reservation not confirmable: {reason}")]
    NotConfirmable {
        /// Why confirmation is impossible.
        reason: NotConfirmableReason,
    },

    /// The reservation is not in a cancellable state.
    #[error("reservation not cancellable: current status is {status}")]
    NotCancellable {
        /// The reservation's current (terminal) status.
        status: ReservationStatus,
    },

    /// Underlying store failure: the transaction was rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl Error {
    /// True for conflict-class errors a well-behaved caller may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SeatUnavailable { .. } | Self::LockUnavailable { .. })
    }

    /// Convenience constructor for validation failures.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Why a reservation could not be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotConfirmableReason {
    /// The reservation is not `Pending`.
    Status(ReservationStatus),
    /// The hold window lapsed before confirmation.
    Expired(DateTime<Utc>),
}

impl std::fmt::Display for NotConfirmableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(f, "current status is {status}"),
            Self::Expired(at) => write!(f, "hold expired at {at}"),
        }
    }
}
