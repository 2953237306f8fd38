//! In-memory transactional store fake.
//!
//! Models the relational contract closely enough for the engine's
//! correctness properties: a transaction takes an exclusive guard over the
//! whole store (a coarse stand-in for row locks; conflicting writers
//! serialize exactly as they would under `FOR UPDATE`), stages its writes on
//! a copy, and publishes them only on commit. Unique constraints on
//! `idempotency_key` and one-sale-per-reservation are enforced at insert,
//! like their index counterparts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seatlock_core::{
    Clock, Error, NewReservation, NewSale, Reservation, ReservationId, ReservationStatus,
    ReservationStore, ReservationWithContext, Sale, SaleId, Seat, SeatId, SeatStatus, Session,
    SessionId, StoreTxn, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
struct StoreData {
    sessions: HashMap<SessionId, Session>,
    seats: HashMap<SeatId, Seat>,
    reservations: HashMap<ReservationId, Reservation>,
    sales: HashMap<SaleId, Sale>,
}

/// In-memory [`ReservationStore`] for engine and state-machine tests.
pub struct InMemoryStore {
    data: Arc<Mutex<StoreData>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Creates an empty store that stamps rows with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(Mutex::new(StoreData::default())), clock }
    }

    /// Seeds a session row.
    pub async fn insert_session(&self, session: Session) {
        self.data.lock().await.sessions.insert(session.id, session);
    }

    /// Seeds a seat row.
    pub async fn insert_seat(&self, seat: Seat) {
        self.data.lock().await.seats.insert(seat.id, seat);
    }

    /// Builds and seeds an available seat for `session_id`.
    pub async fn seed_seat(&self, session_id: SessionId, label: &str) -> Seat {
        let now = self.clock.now();
        let seat = Seat {
            id: SeatId::new(),
            session_id,
            label: label.to_string(),
            status: SeatStatus::Available,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.insert_seat(seat.clone()).await;
        seat
    }

    /// Current seat row, if any.
    pub async fn seat(&self, id: SeatId) -> Option<Seat> {
        self.data.lock().await.seats.get(&id).cloned()
    }

    /// Current reservation row, if any.
    pub async fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.data.lock().await.reservations.get(&id).cloned()
    }

    /// All reservations holding (or having held) a seat.
    pub async fn reservations_for_seat(&self, seat_id: SeatId) -> Vec<Reservation> {
        self.data
            .lock()
            .await
            .reservations
            .values()
            .filter(|r| r.seat_id == seat_id)
            .cloned()
            .collect()
    }

    /// All sale rows.
    pub async fn sales(&self) -> Vec<Sale> {
        self.data.lock().await.sales.values().cloned().collect()
    }

    /// The sale for a reservation, if one exists.
    pub async fn sale_for_reservation(&self, reservation_id: ReservationId) -> Option<Sale> {
        self.data
            .lock()
            .await
            .sales
            .values()
            .find(|sale| sale.reservation_id == reservation_id)
            .cloned()
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    type Txn = InMemoryTxn;

    async fn begin(&self) -> Result<Self::Txn, Error> {
        let guard = Arc::clone(&self.data).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTxn { guard, staged, clock: Arc::clone(&self.clock) })
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, Error> {
        Ok(self
            .data
            .lock()
            .await
            .reservations
            .values()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }
}

/// A staged unit of work over the in-memory store.
pub struct InMemoryTxn {
    guard: OwnedMutexGuard<StoreData>,
    staged: StoreData,
    clock: Arc<dyn Clock>,
}

impl InMemoryTxn {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn context_for(&self, reservation: &Reservation) -> Result<ReservationWithContext, Error> {
        let seat = self
            .staged
            .seats
            .get(&reservation.seat_id)
            .cloned()
            .ok_or_else(|| Error::Transaction("seat row missing for reservation".into()))?;
        let session = self
            .staged
            .sessions
            .get(&seat.session_id)
            .cloned()
            .ok_or_else(|| Error::Transaction("session row missing for seat".into()))?;
        Ok(ReservationWithContext { reservation: reservation.clone(), seat, session })
    }
}

#[async_trait]
impl StoreTxn for InMemoryTxn {
    async fn seats_for_update(&mut self, seat_ids: &[SeatId]) -> Result<Vec<Seat>, Error> {
        let mut seats: Vec<Seat> =
            seat_ids.iter().filter_map(|id| self.staged.seats.get(id).cloned()).collect();
        seats.sort_by_key(|seat| seat.id);
        Ok(seats)
    }

    async fn reservation_for_update(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<ReservationWithContext>, Error> {
        match self.staged.reservations.get(&id).cloned() {
            Some(reservation) => Ok(Some(self.context_for(&reservation)?)),
            None => Ok(None),
        }
    }

    async fn update_seat_status(
        &mut self,
        seat_ids: &[SeatId],
        status: SeatStatus,
    ) -> Result<(), Error> {
        let now = self.now();
        for id in seat_ids {
            let seat = self
                .staged
                .seats
                .get_mut(id)
                .ok_or_else(|| Error::Transaction(format!("seat {id} not found")))?;
            seat.status = status;
            seat.version += 1;
            seat.updated_at = now;
        }
        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<(), Error> {
        let now = self.now();
        let reservation = self
            .staged
            .reservations
            .get_mut(&id)
            .ok_or_else(|| Error::Transaction(format!("reservation {id} not found")))?;
        reservation.status = status;
        reservation.updated_at = now;
        Ok(())
    }

    async fn clear_idempotency_key(&mut self, id: ReservationId) -> Result<(), Error> {
        let reservation = self
            .staged
            .reservations
            .get_mut(&id)
            .ok_or_else(|| Error::Transaction(format!("reservation {id} not found")))?;
        reservation.idempotency_key = None;
        Ok(())
    }

    async fn insert_reservation(&mut self, new: NewReservation) -> Result<Reservation, Error> {
        if let Some(key) = new.idempotency_key.as_deref() {
            let taken = self
                .staged
                .reservations
                .values()
                .any(|r| r.idempotency_key.as_deref() == Some(key));
            if taken {
                return Err(Error::Transaction(format!("duplicate idempotency key '{key}'")));
            }
        }

        let now = self.now();
        let reservation = Reservation {
            id: ReservationId::new(),
            seat_id: new.seat_id,
            user_id: new.user_id,
            status: ReservationStatus::Pending,
            idempotency_key: new.idempotency_key,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        };
        self.staged.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn insert_sale(&mut self, new: NewSale) -> Result<Sale, Error> {
        let duplicate =
            self.staged.sales.values().any(|sale| sale.reservation_id == new.reservation_id);
        if duplicate {
            return Err(Error::Transaction(format!(
                "sale already exists for reservation {}",
                new.reservation_id
            )));
        }

        let sale = Sale {
            id: SaleId::new(),
            reservation_id: new.reservation_id,
            seat_id: new.seat_id,
            user_id: new.user_id,
            amount_paid: new.amount_paid,
            payment_method: new.payment_method,
            confirmed_at: new.confirmed_at,
        };
        self.staged.sales.insert(sale.id, sale.clone());
        Ok(sale)
    }

    async fn expired_pending(
        &mut self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReservationWithContext>, Error> {
        let mut stale: Vec<Reservation> = self
            .staged
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Pending && r.is_expired(now))
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.expires_at, r.id));
        stale.truncate(limit as usize);
        stale.iter().map(|reservation| self.context_for(reservation)).collect()
    }

    async fn commit(mut self) -> Result<(), Error> {
        *self.guard = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Error> {
        // Staged writes drop with the guard.
        Ok(())
    }
}

/// Builds a session with the given ticket price in cents.
#[must_use]
pub fn session_with_price(cents: u64, now: DateTime<Utc>) -> Session {
    Session {
        id: SessionId::new(),
        movie_name: "The Grand Marquee".to_string(),
        starts_at: now + chrono::Duration::hours(3),
        room: "1".to_string(),
        ticket_price: seatlock_core::Money::from_cents(cents),
    }
}

/// Shorthand for a `UserId` in tests.
#[must_use]
pub fn user(id: &str) -> UserId {
    UserId::new(id)
}
