//! Transactional persistence boundary.
//!
//! The state machines never touch storage directly; they run against this
//! narrow interface, which makes them testable with an in-memory fake and
//! keeps the relational engine as a second serialization layer under the
//! distributed locks. Reads destined for mutation take exclusive row locks
//! scoped to the transaction. [`StoreTxn::commit`] and [`StoreTxn::rollback`]
//! consume the transaction, so each can run at most once by construction.

use crate::error::Error;
use crate::types::{
    Money, Reservation, ReservationId, ReservationStatus, Sale, Seat, SeatId, SeatStatus, Session,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A reservation joined to its seat and the seat's owning session.
///
/// Fetched under row locks with inner joins only: combining an outer join
/// with row-locking on the nullable side is illegal in most relational
/// engines, so the boundary rules it out by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationWithContext {
    /// The row-locked reservation.
    pub reservation: Reservation,
    /// Its row-locked seat.
    pub seat: Seat,
    /// The seat's owning session (read-only; not locked).
    pub session: Session,
}

/// Insert payload for a reservation row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReservation {
    /// The held seat.
    pub seat_id: SeatId,
    /// The requesting user.
    pub user_id: UserId,
    /// Deduplication key; attached only for single-seat requests.
    pub idempotency_key: Option<String>,
    /// Hold deadline, shared by sibling rows of one request.
    pub expires_at: DateTime<Utc>,
}

/// Insert payload for a sale row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSale {
    /// The confirmed reservation; unique per sale.
    pub reservation_id: ReservationId,
    /// The sold seat.
    pub seat_id: SeatId,
    /// The purchasing user.
    pub user_id: UserId,
    /// The session's ticket price at confirmation time.
    pub amount_paid: Money,
    /// Caller-reported payment method.
    pub payment_method: String,
    /// Confirmation instant from the engine's clock.
    pub confirmed_at: DateTime<Utc>,
}

/// The atomic unit of work.
///
/// Every method runs inside the open transaction. Mutating methods assume
/// the affected rows were previously fetched with a `*_for_update` call in
/// the same transaction.
#[async_trait]
pub trait StoreTxn: Send {
    /// Fetches seats by id with exclusive row locks, in deterministic id
    /// order.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn seats_for_update(&mut self, seat_ids: &[SeatId]) -> Result<Vec<Seat>, Error>;

    /// Fetches a reservation with its seat and session under row locks
    /// (inner joins).
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn reservation_for_update(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<ReservationWithContext>, Error>;

    /// Sets the status of every given seat, bumping each optimistic version.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn update_seat_status(
        &mut self,
        seat_ids: &[SeatId],
        status: SeatStatus,
    ) -> Result<(), Error>;

    /// Sets a reservation's status.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<(), Error>;

    /// Clears the idempotency key from a stale reservation row so the key
    /// can be reused by the insert that follows in this transaction.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn clear_idempotency_key(&mut self, id: ReservationId) -> Result<(), Error>;

    /// Inserts a pending reservation row and returns it.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure, including idempotency-key
    /// uniqueness violations.
    async fn insert_reservation(&mut self, new: NewReservation) -> Result<Reservation, Error>;

    /// Inserts the sale row for a confirmed reservation and returns it.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure, including violation of the
    /// one-sale-per-reservation constraint.
    async fn insert_sale(&mut self, new: NewSale) -> Result<Sale, Error>;

    /// Selects pending reservations whose hold lapsed before `now`, with
    /// their context, row-locked for the sweep. Rows locked by a racing
    /// confirmation are skipped rather than waited on.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn expired_pending(
        &mut self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReservationWithContext>, Error>;

    /// Commits the unit of work.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] when the commit fails; the transaction is gone
    /// either way.
    async fn commit(self) -> Result<(), Error>;

    /// Rolls the unit of work back, discarding staged writes.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] when the rollback itself fails (logged by
    /// callers; the original error still wins).
    async fn rollback(self) -> Result<(), Error>;
}

/// Factory for transactions plus the lock-free reads the engine needs
/// outside a unit of work.
#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// The store's transaction type.
    type Txn: StoreTxn;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] when the store cannot begin one.
    async fn begin(&self) -> Result<Self::Txn, Error>;

    /// Looks up a reservation by idempotency key, without locks.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] on store failure.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, Error>;
}
