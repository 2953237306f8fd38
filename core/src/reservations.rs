//! Reservation state machine.
//!
//! `Pending` is the only non-terminal status: it may move to `Confirmed`
//! (payment), `Expired` (sweeper), or `Cancelled` (explicit cancellation).
//! The checks here are pure; the engine applies approved transitions inside
//! a row-locked transaction.

use crate::error::{Error, NotConfirmableReason};
use crate::types::{Reservation, ReservationStatus, UserId};
use chrono::{DateTime, Utc};

/// Approves `Pending → Confirmed`.
///
/// Requires current status `Pending` and an unexpired hold window.
///
/// # Errors
///
/// [`Error::NotConfirmable`] carrying the current status, or the expiry fact
/// when the hold has lapsed.
pub fn ensure_confirmable(reservation: &Reservation, now: DateTime<Utc>) -> Result<(), Error> {
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::NotConfirmable {
            reason: NotConfirmableReason::Status(reservation.status),
        });
    }
    if reservation.is_expired(now) {
        return Err(Error::NotConfirmable {
            reason: NotConfirmableReason::Expired(reservation.expires_at),
        });
    }
    Ok(())
}

/// Approves `Pending → Cancelled`.
///
/// Cancellation is an explicit user/operator action, never taken by the
/// sweeper. An expired-but-unswept pending hold may still be cancelled: the
/// seat is released either way. When `requested_by` is `Some`, it must match
/// the reservation's owner; `None` is the operator path.
///
/// # Errors
///
/// [`Error::NotCancellable`] when the reservation is already terminal, or
/// [`Error::Validation`] when `requested_by` does not own the reservation.
pub fn ensure_cancellable(
    reservation: &Reservation,
    requested_by: Option<&UserId>,
) -> Result<(), Error> {
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::NotCancellable { status: reservation.status });
    }
    if let Some(user) = requested_by {
        if *user != reservation.user_id {
            return Err(Error::validation("reservation belongs to another user"));
        }
    }
    Ok(())
}

/// Seconds left in the hold window, clamped at zero.
#[must_use]
pub fn remaining_seconds(reservation: &Reservation, now: DateTime<Utc>) -> u64 {
    let remaining = (reservation.expires_at - now).num_seconds();
    u64::try_from(remaining).unwrap_or(0)
}
