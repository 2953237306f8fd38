//! Seat state machine.
//!
//! Transitions: `Available → Reserved` (reservation creation, batch),
//! `Reserved → Sold` (payment confirmation), `Reserved → Available`
//! (expiration or cancellation). Everything else is illegal. All checks run
//! before any mutation; callers only apply a transition after this module
//! has approved it.

use crate::error::Error;
use crate::types::{Seat, SeatId, SeatStatus, SessionId};

impl SeatStatus {
    /// Whether the transition `self → to` is legal.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Available, Self::Reserved)
                | (Self::Reserved, Self::Sold)
                | (Self::Reserved, Self::Available)
        )
    }
}

/// Validates a batch of seats fetched for a reservation request.
///
/// Order of checks mirrors the request path: every requested seat must
/// exist, every seat must be `Available`, and all seats must belong to one
/// session. Returns that session's id.
///
/// # Errors
///
/// [`Error::Validation`] when a requested seat was not found,
/// [`Error::SeatUnavailable`] naming the offending seat labels, or
/// [`Error::CrossSessionRequest`] when the batch spans sessions.
pub fn validate_reservable(seats: &[Seat], requested: &[SeatId]) -> Result<SessionId, Error> {
    if seats.len() != requested.len() {
        return Err(Error::validation("one or more seats were not found"));
    }

    let unavailable: Vec<String> = seats
        .iter()
        .filter(|seat| seat.status != SeatStatus::Available)
        .map(|seat| seat.label.clone())
        .collect();
    if !unavailable.is_empty() {
        return Err(Error::SeatUnavailable { seats: unavailable });
    }

    let session_id = match seats {
        [] => return Err(Error::validation("seat set must not be empty")),
        [first, rest @ ..] => {
            if rest.iter().any(|seat| seat.session_id != first.session_id) {
                return Err(Error::CrossSessionRequest);
            }
            first.session_id
        }
    };

    Ok(session_id)
}

/// Approves a single-seat transition, naming the seat on refusal.
///
/// # Errors
///
/// [`Error::SeatUnavailable`] when the transition is illegal from the seat's
/// current status.
pub fn ensure_transition(seat: &Seat, to: SeatStatus) -> Result<(), Error> {
    if seat.status.can_transition(to) {
        Ok(())
    } else {
        Err(Error::SeatUnavailable { seats: vec![seat.label.clone()] })
    }
}
