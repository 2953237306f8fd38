//! sqlx-backed implementation of the transactional store boundary.
//!
//! Reads destined for mutation take `FOR UPDATE` row locks, so the
//! relational engine serializes conflicting writers even if the distributed
//! lock layer were bypassed. Reservation context is fetched with inner joins
//! only: locking the nullable side of an outer join is illegal in Postgres,
//! and this module rules the combination out by construction. The sweep
//! selection adds `SKIP LOCKED` so a pass never stalls behind an in-flight
//! confirmation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seatlock_core::{
    Error, Money, NewReservation, NewSale, Reservation, ReservationId, ReservationStatus,
    ReservationStore, ReservationWithContext, Sale, SaleId, Seat, SeatId, SeatStatus, Session,
    SessionId, StoreTxn, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// `PostgreSQL` [`ReservationStore`].
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    type Txn = PgTxn;

    async fn begin(&self) -> Result<Self::Txn, Error> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(PgTxn { tx })
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, Error> {
        let row = sqlx::query(
            r"
            SELECT id, seat_id, user_id, status, idempotency_key,
                   expires_at, created_at, updated_at
            FROM reservations
            WHERE idempotency_key = $1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_reservation).transpose()
    }
}

/// One open `PostgreSQL` transaction; committing or rolling back consumes it.
pub struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTxn for PgTxn {
    async fn seats_for_update(&mut self, seat_ids: &[SeatId]) -> Result<Vec<Seat>, Error> {
        let ids: Vec<Uuid> = seat_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r"
            SELECT id, session_id, label, status, version, created_at, updated_at
            FROM seats
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            ",
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_seat).collect()
    }

    async fn reservation_for_update(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<ReservationWithContext>, Error> {
        let row = sqlx::query(
            r"
            SELECT
                r.id AS r_id, r.seat_id AS r_seat_id, r.user_id AS r_user_id,
                r.status AS r_status, r.idempotency_key, r.expires_at,
                r.created_at AS r_created_at, r.updated_at AS r_updated_at,
                s.id AS s_id, s.session_id AS s_session_id, s.label, s.status AS s_status,
                s.version, s.created_at AS s_created_at, s.updated_at AS s_updated_at,
                sess.id AS sess_id, sess.movie_name, sess.starts_at, sess.room,
                sess.ticket_price_cents
            FROM reservations r
            JOIN seats s ON s.id = r.seat_id
            JOIN sessions sess ON sess.id = s.session_id
            WHERE r.id = $1
            FOR UPDATE OF r, s
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_context).transpose()
    }

    async fn update_seat_status(
        &mut self,
        seat_ids: &[SeatId],
        status: SeatStatus,
    ) -> Result<(), Error> {
        let ids: Vec<Uuid> = seat_ids.iter().map(|id| *id.as_uuid()).collect();
        let result = sqlx::query(
            r"
            UPDATE seats
            SET status = $2, version = version + 1, updated_at = NOW()
            WHERE id = ANY($1)
            ",
        )
        .bind(&ids)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() != seat_ids.len() as u64 {
            return Err(Error::Transaction(format!(
                "expected to update {} seats, updated {}",
                seat_ids.len(),
                result.rows_affected()
            )));
        }
        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<(), Error> {
        sqlx::query(
            r"
            UPDATE reservations
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn clear_idempotency_key(&mut self, id: ReservationId) -> Result<(), Error> {
        sqlx::query(
            r"
            UPDATE reservations
            SET idempotency_key = NULL, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        tracing::debug!(reservation_id = %id, "cleared idempotency key from stale reservation");
        Ok(())
    }

    async fn insert_reservation(&mut self, new: NewReservation) -> Result<Reservation, Error> {
        let id = ReservationId::new();
        let row = sqlx::query(
            r"
            INSERT INTO reservations (id, seat_id, user_id, status, idempotency_key, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at, updated_at
            ",
        )
        .bind(id.as_uuid())
        .bind(new.seat_id.as_uuid())
        .bind(new.user_id.as_str())
        .bind(ReservationStatus::Pending.as_str())
        .bind(new.idempotency_key.as_deref())
        .bind(new.expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(Reservation {
            id,
            seat_id: new.seat_id,
            user_id: new.user_id,
            status: ReservationStatus::Pending,
            idempotency_key: new.idempotency_key,
            expires_at: new.expires_at,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
        })
    }

    async fn insert_sale(&mut self, new: NewSale) -> Result<Sale, Error> {
        let id = SaleId::new();
        let amount_cents = i64::try_from(new.amount_paid.cents())
            .map_err(|_| Error::Transaction("sale amount overflows bigint".into()))?;

        sqlx::query(
            r"
            INSERT INTO sales (id, reservation_id, seat_id, user_id,
                               amount_paid_cents, payment_method, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(id.as_uuid())
        .bind(new.reservation_id.as_uuid())
        .bind(new.seat_id.as_uuid())
        .bind(new.user_id.as_str())
        .bind(amount_cents)
        .bind(&new.payment_method)
        .bind(new.confirmed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(Sale {
            id,
            reservation_id: new.reservation_id,
            seat_id: new.seat_id,
            user_id: new.user_id,
            amount_paid: new.amount_paid,
            payment_method: new.payment_method,
            confirmed_at: new.confirmed_at,
        })
    }

    async fn expired_pending(
        &mut self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReservationWithContext>, Error> {
        let rows = sqlx::query(
            r"
            SELECT
                r.id AS r_id, r.seat_id AS r_seat_id, r.user_id AS r_user_id,
                r.status AS r_status, r.idempotency_key, r.expires_at,
                r.created_at AS r_created_at, r.updated_at AS r_updated_at,
                s.id AS s_id, s.session_id AS s_session_id, s.label, s.status AS s_status,
                s.version, s.created_at AS s_created_at, s.updated_at AS s_updated_at,
                sess.id AS sess_id, sess.movie_name, sess.starts_at, sess.room,
                sess.ticket_price_cents
            FROM reservations r
            JOIN seats s ON s.id = r.seat_id
            JOIN sessions sess ON sess.id = s.session_id
            WHERE r.status = 'pending' AND r.expires_at < $1
            ORDER BY r.expires_at
            LIMIT $2
            FOR UPDATE OF r, s SKIP LOCKED
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_context).collect()
    }

    async fn commit(self) -> Result<(), Error> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self) -> Result<(), Error> {
        self.tx.rollback().await.map_err(db_err)
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn db_err(err: sqlx::Error) -> Error {
    Error::Transaction(err.to_string())
}

fn parse_seat_status(raw: &str) -> Result<SeatStatus, Error> {
    SeatStatus::parse(raw)
        .ok_or_else(|| Error::Transaction(format!("unknown seat status '{raw}'")))
}

fn parse_reservation_status(raw: &str) -> Result<ReservationStatus, Error> {
    ReservationStatus::parse(raw)
        .ok_or_else(|| Error::Transaction(format!("unknown reservation status '{raw}'")))
}

fn money_from_cents_column(cents: i64) -> Result<Money, Error> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| Error::Transaction(format!("negative amount in store: {cents}")))
}

fn row_to_seat(row: &PgRow) -> Result<Seat, Error> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Seat {
        id: SeatId::from_uuid(row.try_get("id").map_err(db_err)?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(db_err)?),
        label: row.try_get("label").map_err(db_err)?,
        status: parse_seat_status(&status)?,
        version: row.try_get("version").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation, Error> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let user_id: String = row.try_get("user_id").map_err(db_err)?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(db_err)?),
        seat_id: SeatId::from_uuid(row.try_get("seat_id").map_err(db_err)?),
        user_id: UserId::new(user_id),
        status: parse_reservation_status(&status)?,
        idempotency_key: row.try_get("idempotency_key").map_err(db_err)?,
        expires_at: row.try_get("expires_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn row_to_context(row: &PgRow) -> Result<ReservationWithContext, Error> {
    let r_status: String = row.try_get("r_status").map_err(db_err)?;
    let r_user_id: String = row.try_get("r_user_id").map_err(db_err)?;
    let s_status: String = row.try_get("s_status").map_err(db_err)?;
    let ticket_price_cents: i64 = row.try_get("ticket_price_cents").map_err(db_err)?;

    Ok(ReservationWithContext {
        reservation: Reservation {
            id: ReservationId::from_uuid(row.try_get("r_id").map_err(db_err)?),
            seat_id: SeatId::from_uuid(row.try_get("r_seat_id").map_err(db_err)?),
            user_id: UserId::new(r_user_id),
            status: parse_reservation_status(&r_status)?,
            idempotency_key: row.try_get("idempotency_key").map_err(db_err)?,
            expires_at: row.try_get("expires_at").map_err(db_err)?,
            created_at: row.try_get("r_created_at").map_err(db_err)?,
            updated_at: row.try_get("r_updated_at").map_err(db_err)?,
        },
        seat: Seat {
            id: SeatId::from_uuid(row.try_get("s_id").map_err(db_err)?),
            session_id: SessionId::from_uuid(row.try_get("s_session_id").map_err(db_err)?),
            label: row.try_get("label").map_err(db_err)?,
            status: parse_seat_status(&s_status)?,
            version: row.try_get("version").map_err(db_err)?,
            created_at: row.try_get("s_created_at").map_err(db_err)?,
            updated_at: row.try_get("s_updated_at").map_err(db_err)?,
        },
        session: Session {
            id: SessionId::from_uuid(row.try_get("sess_id").map_err(db_err)?),
            movie_name: row.try_get("movie_name").map_err(db_err)?,
            starts_at: row.try_get("starts_at").map_err(db_err)?,
            room: row.try_get("room").map_err(db_err)?,
            ticket_price: money_from_cents_column(ticket_price_cents)?,
        },
    })
}
