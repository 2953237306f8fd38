//! # Seatlock Postgres
//!
//! `PostgreSQL` implementation of the seatlock transactional store boundary.
//!
//! Provides [`PgReservationStore`], which realizes the
//! `seatlock_core::store` contract with:
//!
//! - Transactions opened from a connection pool; commit/rollback consume the
//!   transaction handle.
//! - Pessimistic `FOR UPDATE` row locks on every read destined for
//!   mutation.
//! - Inner-join fetches of reservation + seat + owning session (row-locking
//!   the nullable side of an outer join is illegal; the queries make the
//!   combination unrepresentable).
//! - `FOR UPDATE SKIP LOCKED` sweep selection so the expiration pass skips
//!   rows a racing confirmation holds.
//!
//! The schema lives in `schema.sql` at the crate root.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod store;

pub use store::{PgReservationStore, PgTxn};
