//! The reservation engine: creation, payment confirmation, cancellation.
//!
//! Every state-changing operation follows the same shape: classify (guard),
//! acquire distributed locks in canonical order, open a transaction, let the
//! state machines approve each transition under row locks, commit, release
//! the locks unconditionally, then fire best-effort notifications. Errors
//! raised after the transaction opens trigger rollback before they
//! propagate; nothing best-effort can mask or roll back a committed result.
//!
//! Known gap, preserved from observed behavior: the idempotency key is
//! attached only when a request targets exactly one seat, so multi-seat
//! replays are not deduplicated.

use crate::config::EngineConfig;
use seatlock_core::{
    idempotency::{self, IdempotentOutcome},
    reservations, seats,
    store::{NewReservation, NewSale},
    AvailabilityCache, Clock, DomainEvent, Error, EventPublisher, LockCoordinator, Money,
    Reservation, ReservationId, ReservationStatus, ResourceKey, ReservationStore, Sale, SaleId,
    SeatId, SeatStatus, SessionId, StoreTxn, UserId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// Requests and responses
// ============================================================================

/// A validated-upstream reservation request.
#[derive(Clone, Debug)]
pub struct CreateReservation {
    /// Seats to hold; must be non-empty and single-session.
    pub seat_ids: Vec<SeatId>,
    /// The requesting user.
    pub user_id: UserId,
    /// Optional client-supplied deduplication token.
    pub idempotency_key: Option<String>,
}

/// One created (or replayed) reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReservationSummary {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Held seat.
    pub seat_id: SeatId,
    /// Hold deadline.
    pub expires_at: DateTime<Utc>,
}

/// Result of a creation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReservationCreated {
    /// Created or replayed reservations, one per seat.
    pub reservations: Vec<ReservationSummary>,
    /// Whole seconds of hold time remaining.
    pub expires_in_seconds: u64,
    /// Human-readable outcome.
    pub message: String,
}

/// Result of a payment confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmed {
    /// The created sale.
    pub sale_id: SaleId,
    /// The confirmed reservation.
    pub reservation_id: ReservationId,
    /// Display label of the sold seat.
    pub seat_label: String,
    /// Amount charged: the session's ticket price at confirmation time.
    pub amount_paid: Money,
}

/// Result of an explicit cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReservationCancelled {
    /// The cancelled reservation.
    pub reservation_id: ReservationId,
    /// The released seat.
    pub seat_id: SeatId,
    /// The seat's owning session.
    pub session_id: SessionId,
}

struct CreatedBatch {
    session_id: SessionId,
    reservations: Vec<Reservation>,
    expires_at: DateTime<Utc>,
}

// ============================================================================
// Engine
// ============================================================================

/// Orchestrates the reservation lifecycle against explicit collaborators.
///
/// No ambient registry: every dependency arrives through [`Self::new`]. The
/// engine keeps no mutable state of its own, so one instance is freely
/// shared across request handlers, and multiple engine processes may run
/// against the same store and lock coordinator.
pub struct ReservationEngine<S: ReservationStore> {
    store: Arc<S>,
    locks: Arc<dyn LockCoordinator>,
    publisher: Arc<dyn EventPublisher>,
    cache: Arc<dyn AvailabilityCache>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S: ReservationStore> ReservationEngine<S> {
    /// Wires an engine from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        locks: Arc<dyn LockCoordinator>,
        publisher: Arc<dyn EventPublisher>,
        cache: Arc<dyn AvailabilityCache>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self { store, locks, publisher, cache, clock, config }
    }

    /// Creates a pending hold on every requested seat.
    ///
    /// Idempotent replays (same key, original live or confirmed) return the
    /// prior reservation without acquiring locks or doing new work.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`], [`Error::SeatUnavailable`],
    /// [`Error::CrossSessionRequest`], [`Error::LockUnavailable`], or
    /// [`Error::Transaction`].
    pub async fn create_reservation(
        &self,
        request: CreateReservation,
    ) -> Result<ReservationCreated, Error> {
        let seat_ids = validate_request(&request)?;

        let stale_key_holder = match self.classify_by_key(request.idempotency_key.as_deref()).await?
        {
            GuardDecision::Replay(response) => return Ok(response),
            GuardDecision::Proceed { stale_key_holder } => stale_key_holder,
        };

        let keys: Vec<ResourceKey> = seat_ids.iter().map(|id| ResourceKey::seat(*id)).collect();
        let lease = self.locks.acquire(&keys, self.config.lock_ttl).await?;
        let guarded_start = Instant::now();
        let outcome = self
            .create_locked(&seat_ids, &request.user_id, request.idempotency_key, stale_key_holder)
            .await;
        self.observe_guarded_section(guarded_start, "create_reservation");
        self.locks.release(lease).await;

        let batch = outcome?;
        self.cache.invalidate(batch.session_id).await;
        self.publish_best_effort(DomainEvent::ReservationCreated {
            reservation_ids: batch.reservations.iter().map(|r| r.id).collect(),
            session_id: batch.session_id,
            seat_ids: seat_ids.clone(),
            user_id: request.user_id.clone(),
            expires_at: batch.expires_at,
        })
        .await;

        metrics::counter!("seatlock.reservations.created")
            .increment(batch.reservations.len() as u64);
        tracing::info!(
            session_id = %batch.session_id,
            user_id = %request.user_id,
            seats = seat_ids.len(),
            expires_at = %batch.expires_at,
            "reservations created"
        );

        let ttl = self.config.reservation_ttl_seconds;
        Ok(ReservationCreated {
            reservations: batch
                .reservations
                .iter()
                .map(|r| ReservationSummary {
                    id: r.id,
                    seat_id: r.seat_id,
                    expires_at: r.expires_at,
                })
                .collect(),
            expires_in_seconds: ttl,
            message: format!("Reservation(s) created. Confirm payment within {ttl} seconds."),
        })
    }

    /// Converts a pending, unexpired reservation into a sale.
    ///
    /// The charged amount is the owning session's ticket price at
    /// confirmation time, not anything from the original request.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the reservation does not exist,
    /// [`Error::NotConfirmable`], [`Error::LockUnavailable`], or
    /// [`Error::Transaction`].
    pub async fn confirm_payment(
        &self,
        reservation_id: ReservationId,
        payment_method: Option<String>,
    ) -> Result<PaymentConfirmed, Error> {
        let keys = [ResourceKey::reservation(reservation_id)];
        let lease = self.locks.acquire(&keys, self.config.lock_ttl).await?;
        let guarded_start = Instant::now();
        let outcome = self.confirm_locked(reservation_id, payment_method).await;
        self.observe_guarded_section(guarded_start, "confirm_payment");
        self.locks.release(lease).await;

        let (sale, seat_label, session_id) = outcome?;
        self.cache.invalidate(session_id).await;
        self.publish_best_effort(DomainEvent::PaymentConfirmed {
            reservation_id: sale.reservation_id,
            sale_id: sale.id,
            seat_id: sale.seat_id,
            user_id: sale.user_id.clone(),
            amount_paid: sale.amount_paid,
        })
        .await;

        metrics::counter!("seatlock.sales.confirmed").increment(1);
        tracing::info!(
            reservation_id = %sale.reservation_id,
            sale_id = %sale.id,
            amount_paid = %sale.amount_paid,
            "payment confirmed"
        );

        Ok(PaymentConfirmed {
            sale_id: sale.id,
            reservation_id: sale.reservation_id,
            seat_label,
            amount_paid: sale.amount_paid,
        })
    }

    /// Explicitly cancels a pending reservation, releasing its seat.
    ///
    /// `requested_by` of `Some(user)` enforces ownership; `None` is the
    /// operator path. The sweeper never calls this.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`], [`Error::NotCancellable`],
    /// [`Error::LockUnavailable`], or [`Error::Transaction`].
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        requested_by: Option<UserId>,
    ) -> Result<ReservationCancelled, Error> {
        let keys = [ResourceKey::reservation(reservation_id)];
        let lease = self.locks.acquire(&keys, self.config.lock_ttl).await?;
        let guarded_start = Instant::now();
        let outcome = self.cancel_locked(reservation_id, requested_by.as_ref()).await;
        self.observe_guarded_section(guarded_start, "cancel_reservation");
        self.locks.release(lease).await;

        let (reservation, session_id) = outcome?;
        self.cache.invalidate(session_id).await;
        self.publish_best_effort(DomainEvent::ReservationCancelled {
            reservation_id: reservation.id,
            seat_id: reservation.seat_id,
            session_id,
            user_id: reservation.user_id.clone(),
        })
        .await;

        metrics::counter!("seatlock.reservations.cancelled").increment(1);
        tracing::info!(reservation_id = %reservation.id, "reservation cancelled");

        Ok(ReservationCancelled {
            reservation_id: reservation.id,
            seat_id: reservation.seat_id,
            session_id,
        })
    }

    // ------------------------------------------------------------------
    // Guard
    // ------------------------------------------------------------------

    async fn classify_by_key(&self, key: Option<&str>) -> Result<GuardDecision, Error> {
        let Some(key) = key else {
            return Ok(GuardDecision::Proceed { stale_key_holder: None });
        };
        if key.is_empty() {
            return Err(Error::validation("idempotency key must not be empty"));
        }

        let existing = self.store.find_by_idempotency_key(key).await?;
        match idempotency::classify(existing, self.clock.now()) {
            IdempotentOutcome::Novel => Ok(GuardDecision::Proceed { stale_key_holder: None }),
            IdempotentOutcome::AlreadyConfirmed(prior) => {
                tracing::info!(reservation_id = %prior.id, "idempotent replay of confirmed reservation");
                Ok(GuardDecision::Replay(ReservationCreated {
                    reservations: vec![ReservationSummary {
                        id: prior.id,
                        seat_id: prior.seat_id,
                        expires_at: prior.expires_at,
                    }],
                    expires_in_seconds: 0,
                    message: "Reservation already confirmed.".to_string(),
                }))
            }
            IdempotentOutcome::StillPending { reservation, remaining_seconds } => {
                tracing::info!(reservation_id = %reservation.id, "idempotent replay of pending reservation");
                Ok(GuardDecision::Replay(ReservationCreated {
                    reservations: vec![ReservationSummary {
                        id: reservation.id,
                        seat_id: reservation.seat_id,
                        expires_at: reservation.expires_at,
                    }],
                    expires_in_seconds: remaining_seconds,
                    message: "Pending reservation returned (idempotent replay).".to_string(),
                }))
            }
            IdempotentOutcome::ReplacedStale { stale_reservation_id } => {
                tracing::info!(
                    reservation_id = %stale_reservation_id,
                    "prior reservation is dead; replacing its idempotency key"
                );
                Ok(GuardDecision::Proceed { stale_key_holder: Some(stale_reservation_id) })
            }
        }
    }

    // ------------------------------------------------------------------
    // Guarded sections
    // ------------------------------------------------------------------

    async fn create_locked(
        &self,
        seat_ids: &[SeatId],
        user_id: &UserId,
        idempotency_key: Option<String>,
        stale_key_holder: Option<ReservationId>,
    ) -> Result<CreatedBatch, Error> {
        let mut txn = self.store.begin().await?;
        let staged = self
            .apply_create(&mut txn, seat_ids, user_id, idempotency_key, stale_key_holder)
            .await;
        finish(txn, staged).await
    }

    async fn apply_create(
        &self,
        txn: &mut S::Txn,
        seat_ids: &[SeatId],
        user_id: &UserId,
        idempotency_key: Option<String>,
        stale_key_holder: Option<ReservationId>,
    ) -> Result<CreatedBatch, Error> {
        let seats = txn.seats_for_update(seat_ids).await?;
        let session_id = seats::validate_reservable(&seats, seat_ids)?;

        txn.update_seat_status(seat_ids, SeatStatus::Reserved).await?;
        if let Some(stale) = stale_key_holder {
            txn.clear_idempotency_key(stale).await?;
        }

        let expires_at = self.clock.now() + self.config.hold_window();
        let mut created = Vec::with_capacity(seats.len());
        for seat in &seats {
            // Observed behavior, preserved: the key only protects
            // single-seat requests.
            let key = if seats.len() == 1 { idempotency_key.clone() } else { None };
            created.push(
                txn.insert_reservation(NewReservation {
                    seat_id: seat.id,
                    user_id: user_id.clone(),
                    idempotency_key: key,
                    expires_at,
                })
                .await?,
            );
        }

        Ok(CreatedBatch { session_id, reservations: created, expires_at })
    }

    async fn confirm_locked(
        &self,
        reservation_id: ReservationId,
        payment_method: Option<String>,
    ) -> Result<(Sale, String, SessionId), Error> {
        let mut txn = self.store.begin().await?;
        let staged = self.apply_confirm(&mut txn, reservation_id, payment_method).await;
        finish(txn, staged).await
    }

    async fn apply_confirm(
        &self,
        txn: &mut S::Txn,
        reservation_id: ReservationId,
        payment_method: Option<String>,
    ) -> Result<(Sale, String, SessionId), Error> {
        let ctx = txn
            .reservation_for_update(reservation_id)
            .await?
            .ok_or_else(|| Error::validation("reservation not found"))?;

        let now = self.clock.now();
        reservations::ensure_confirmable(&ctx.reservation, now)?;
        seats::ensure_transition(&ctx.seat, SeatStatus::Sold)?;

        txn.update_reservation_status(reservation_id, ReservationStatus::Confirmed).await?;
        txn.update_seat_status(&[ctx.seat.id], SeatStatus::Sold).await?;
        let sale = txn
            .insert_sale(NewSale {
                reservation_id,
                seat_id: ctx.seat.id,
                user_id: ctx.reservation.user_id.clone(),
                amount_paid: ctx.session.ticket_price,
                payment_method: payment_method
                    .unwrap_or_else(|| "not_specified".to_string()),
                confirmed_at: now,
            })
            .await?;

        Ok((sale, ctx.seat.label, ctx.session.id))
    }

    async fn cancel_locked(
        &self,
        reservation_id: ReservationId,
        requested_by: Option<&UserId>,
    ) -> Result<(Reservation, SessionId), Error> {
        let mut txn = self.store.begin().await?;
        let staged = self.apply_cancel(&mut txn, reservation_id, requested_by).await;
        finish(txn, staged).await
    }

    async fn apply_cancel(
        &self,
        txn: &mut S::Txn,
        reservation_id: ReservationId,
        requested_by: Option<&UserId>,
    ) -> Result<(Reservation, SessionId), Error> {
        let ctx = txn
            .reservation_for_update(reservation_id)
            .await?
            .ok_or_else(|| Error::validation("reservation not found"))?;

        reservations::ensure_cancellable(&ctx.reservation, requested_by)?;
        seats::ensure_transition(&ctx.seat, SeatStatus::Available)?;

        txn.update_reservation_status(reservation_id, ReservationStatus::Cancelled).await?;
        txn.update_seat_status(&[ctx.seat.id], SeatStatus::Available).await?;

        Ok((ctx.reservation, ctx.session.id))
    }

    // ------------------------------------------------------------------
    // Best-effort side channels
    // ------------------------------------------------------------------

    async fn publish_best_effort(&self, event: DomainEvent) {
        let routing_key = event.routing_key();
        if let Err(err) = self.publisher.publish(&event).await {
            tracing::warn!(error = %err, routing_key, "event publish failed; continuing");
        }
    }

    /// Near-miss lease alerting: the lease must outlive the guarded
    /// transaction with margin, so crossing half the lease is worth a
    /// warning long before a second acquirer could run concurrently.
    fn observe_guarded_section(&self, started: Instant, operation: &'static str) {
        let elapsed = started.elapsed();
        if elapsed > self.config.lock_ttl / 2 {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis(),
                lease_ms = self.config.lock_ttl.as_millis(),
                "guarded section consumed more than half the lock lease"
            );
        }
    }
}

enum GuardDecision {
    Replay(ReservationCreated),
    Proceed { stale_key_holder: Option<ReservationId> },
}

/// Commits on success; rolls back and re-raises on failure. Rollback
/// failures are logged, and the original error still wins.
async fn finish<T, Txn: StoreTxn>(txn: Txn, staged: Result<T, Error>) -> Result<T, Error> {
    match staged {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed after aborted operation");
            }
            Err(err)
        }
    }
}

fn validate_request(request: &CreateReservation) -> Result<Vec<SeatId>, Error> {
    if request.seat_ids.is_empty() {
        return Err(Error::validation("seat set must not be empty"));
    }
    if request.user_id.is_empty() {
        return Err(Error::validation("user id must not be empty"));
    }
    let mut seat_ids = request.seat_ids.clone();
    seat_ids.sort();
    seat_ids.dedup();
    Ok(seat_ids)
}
