//! Expiration sweeper.
//!
//! Periodically drives stale `Pending` reservations to `Expired` and
//! releases their seats. Each pass is one bounded, best-effort batch
//! transaction: a failed pass is logged and left for the next tick, which
//! naturally re-selects the same stale rows. The sweeper takes no
//! distributed lock: the row-locked transaction re-evaluates the `Pending`
//! filter at sweep time, so a reservation confirmed by a racing payment
//! simply drops out of the sweep set, and rows locked by in-flight confirms
//! are skipped rather than waited on.

use seatlock_core::{
    AvailabilityCache, Clock, DomainEvent, Error, EventPublisher, ReservationStatus,
    ReservationStore, ReservationWithContext, SeatStatus, SessionId, StoreTxn,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sweeps expired pending reservations on a fixed interval.
///
/// [`Self::run_once`] is independently callable (and tested) without the
/// timer; [`Self::spawn`] attaches the ticker.
pub struct ExpirationSweeper<S: ReservationStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    cache: Arc<dyn AvailabilityCache>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_limit: u32,
}

impl<S: ReservationStore> ExpirationSweeper<S> {
    /// Wires a sweeper from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        publisher: Arc<dyn EventPublisher>,
        cache: Arc<dyn AvailabilityCache>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        batch_limit: u32,
    ) -> Self {
        Self { store, publisher, cache, clock, interval, batch_limit }
    }

    /// One bounded sweep pass. Returns how many reservations were expired.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] when the batch transaction fails; the whole
    /// pass rolls back and the next tick retries naturally.
    pub async fn run_once(&self) -> Result<usize, Error> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;
        let staged = Self::apply_sweep(&mut txn, now, self.batch_limit).await;

        let swept = match staged {
            Ok(swept) => {
                txn.commit().await?;
                swept
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed after aborted sweep");
                }
                return Err(err);
            }
        };

        if swept.is_empty() {
            return Ok(0);
        }

        // Notifications strictly after commit; dedupe session invalidations
        // across the batch.
        let mut sessions: Vec<SessionId> = swept.iter().map(|ctx| ctx.session.id).collect();
        sessions.sort();
        sessions.dedup();
        for session_id in sessions {
            self.cache.invalidate(session_id).await;
        }
        for ctx in &swept {
            let event = DomainEvent::ReservationExpired {
                reservation_id: ctx.reservation.id,
                seat_id: ctx.seat.id,
                session_id: ctx.session.id,
            };
            if let Err(err) = self.publisher.publish(&event).await {
                tracing::warn!(error = %err, "expiration event publish failed; continuing");
            }
        }

        metrics::counter!("seatlock.reservations.expired").increment(swept.len() as u64);
        tracing::info!(expired = swept.len(), "sweep expired stale reservations");
        Ok(swept.len())
    }

    async fn apply_sweep(
        txn: &mut S::Txn,
        now: chrono::DateTime<chrono::Utc>,
        batch_limit: u32,
    ) -> Result<Vec<ReservationWithContext>, Error> {
        let stale = txn.expired_pending(now, batch_limit).await?;
        for ctx in &stale {
            txn.update_reservation_status(ctx.reservation.id, ReservationStatus::Expired).await?;
            txn.update_seat_status(&[ctx.seat.id], SeatStatus::Available).await?;
        }
        Ok(stale)
    }

    /// Starts the periodic ticker. The returned handle aborts the loop when
    /// dropped by the caller's runtime shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::error!(error = %err, "sweep failed; retrying on next tick");
                }
            }
        })
    }
}
