//! # Seatlock Core
//!
//! Domain types, state machines, and collaborator seams for the seat
//! reservation concurrency and lifecycle engine.
//!
//! This crate is deliberately I/O-free. It defines:
//!
//! - The data model ([`types`]): seats, reservations, sales, sessions.
//! - The error taxonomy ([`error`]): conflicts as values, with a
//!   retryable/permanent split.
//! - Pure state machines ([`seats`], [`reservations`]): legal transitions
//!   approved before any mutation.
//! - Idempotency classification ([`idempotency`]): what a retried create
//!   call must do.
//! - The collaborator seams ([`store`], [`lock`], [`events`], [`cache`],
//!   [`clock`]): traits the engine orchestrates and infrastructure crates
//!   implement.
//!
//! Correctness is externalized by design: all shared mutable state lives
//! behind the [`store::ReservationStore`] transaction boundary and the
//! [`lock::LockCoordinator`], so any number of engine instances may run
//! concurrently.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod clock;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod lock;
pub mod reservations;
pub mod seats;
pub mod store;
pub mod types;

pub use cache::AvailabilityCache;
pub use clock::{Clock, SystemClock};
pub use error::{Error, NotConfirmableReason};
pub use events::{DomainEvent, EventPublisher, PublishError, EVENTS_TOPIC};
pub use idempotency::IdempotentOutcome;
pub use lock::{Lease, LockCoordinator, LockError, ResourceKey};
pub use store::{NewReservation, NewSale, ReservationStore, ReservationWithContext, StoreTxn};
pub use types::{
    Money, Reservation, ReservationId, ReservationStatus, Sale, SaleId, Seat, SeatId, SeatStatus,
    Session, SessionId, UserId,
};
