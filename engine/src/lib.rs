//! # Seatlock Engine
//!
//! The reservation concurrency and lifecycle engine: allocates uniquely
//! identified seats to competing concurrent requesters with strict
//! at-most-one-winner semantics, bounded holds, idempotent retry safety,
//! and an auditable conversion into a permanent sale record.
//!
//! The engine orchestrates the seams defined in `seatlock-core`:
//!
//! 1. Idempotency-key classification (no locks, no new work on replay).
//! 2. Distributed lock acquisition over canonically sorted resource keys.
//! 3. A transactional unit of work in which the pure state machines approve
//!    every seat and reservation transition under row locks.
//! 4. Commit, unconditional lock release, then best-effort cache
//!    invalidation and event publication.
//!
//! The [`sweeper::ExpirationSweeper`] applies the same pattern on a timer to
//! expire stale holds.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod reservations;
pub mod sweeper;

pub use config::EngineConfig;
pub use reservations::{
    CreateReservation, PaymentConfirmed, ReservationCancelled, ReservationCreated,
    ReservationEngine, ReservationSummary,
};
pub use sweeper::ExpirationSweeper;
