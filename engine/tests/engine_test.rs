//! Reservation engine integration tests against the in-memory fakes.
//!
//! Covers the concurrency, idempotency, and lifecycle properties: exactly
//! one winner per seat, canonical lock ordering, replay safety, and the
//! full reserve → confirm → re-confirm scenario.
//!
//! Run with: `cargo test -p seatlock-engine --test engine_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use seatlock_core::{
    Clock, Error, LockCoordinator, Money, NotConfirmableReason, ReservationStatus,
    ReservationStore, ResourceKey, SeatStatus, Session,
};
use seatlock_engine::{CreateReservation, EngineConfig, ReservationEngine};
use seatlock_testing::{
    session_with_price, user, InMemoryLockCoordinator, InMemoryStore, ManualClock, RecordingCache,
    RecordingEventBus,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    engine: Arc<ReservationEngine<InMemoryStore>>,
    store: Arc<InMemoryStore>,
    locks: Arc<InMemoryLockCoordinator>,
    bus: Arc<RecordingEventBus>,
    cache: Arc<RecordingCache>,
    clock: Arc<ManualClock>,
    session: Session,
}

fn harness() -> Harness {
    harness_with_locks(Arc::new(InMemoryLockCoordinator::default()))
}

fn harness_with_locks(locks: Arc<InMemoryLockCoordinator>) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let bus = Arc::new(RecordingEventBus::new());
    let cache = Arc::new(RecordingCache::new());
    let session = session_with_price(2500, clock.now());

    let engine = Arc::new(ReservationEngine::new(
        store.clone(),
        locks.clone(),
        bus.clone(),
        cache.clone(),
        clock.clone(),
        EngineConfig::default(),
    ));

    Harness { engine, store, locks, bus, cache, clock, session }
}

fn request(seat_ids: &[seatlock_core::SeatId], user_id: &str) -> CreateReservation {
    CreateReservation {
        seat_ids: seat_ids.to_vec(),
        user_id: user(user_id),
        idempotency_key: None,
    }
}

fn keyed_request(
    seat_ids: &[seatlock_core::SeatId],
    user_id: &str,
    key: &str,
) -> CreateReservation {
    CreateReservation {
        seat_ids: seat_ids.to_vec(),
        user_id: user(user_id),
        idempotency_key: Some(key.to_string()),
    }
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn reserve_single_seat_happy_path() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("reserve");

    assert_eq!(created.reservations.len(), 1);
    assert_eq!(created.expires_in_seconds, 30);
    assert_eq!(created.reservations[0].seat_id, seat.id);

    let seat_row = h.store.seat(seat.id).await.unwrap();
    assert_eq!(seat_row.status, SeatStatus::Reserved);
    assert_eq!(seat_row.version, 2);

    let reservation = h.store.reservation(created.reservations[0].id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(reservation.expires_at, created.reservations[0].expires_at);

    assert_eq!(h.bus.routing_keys(), vec!["reservation.created"]);
    assert_eq!(h.cache.invalidations(), vec![h.session.id]);
    assert!(!h.locks.is_held(&ResourceKey::seat(seat.id)).await, "lock released");
}

#[tokio::test]
async fn multi_seat_request_creates_siblings_sharing_deadline() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let a1 = h.store.seed_seat(h.session.id, "A1").await;
    let a2 = h.store.seed_seat(h.session.id, "A2").await;

    // The idempotency key is attached only to single-seat requests; the
    // multi-seat path drops it (observed behavior, preserved).
    let created = h
        .engine
        .create_reservation(keyed_request(&[a1.id, a2.id], "u1", "multi-key"))
        .await
        .expect("reserve");

    assert_eq!(created.reservations.len(), 2);
    let first = h.store.reservation(created.reservations[0].id).await.unwrap();
    let second = h.store.reservation(created.reservations[1].id).await.unwrap();
    assert_eq!(first.expires_at, second.expires_at);
    assert_eq!(first.idempotency_key, None);
    assert_eq!(second.idempotency_key, None);
    assert!(h.store.find_by_idempotency_key("multi-key").await.unwrap().is_none());
}

#[tokio::test]
async fn second_requester_fails_with_seat_unavailable() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("first wins");
    let err = h.engine.create_reservation(request(&[seat.id], "u2")).await.unwrap_err();

    assert_eq!(err, Error::SeatUnavailable { seats: vec!["A1".to_string()] });
    assert!(err.is_retryable());
    assert_eq!(h.store.reservations_for_seat(seat.id).await.len(), 1);
}

#[tokio::test]
async fn cross_session_request_is_rejected_before_any_mutation() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let other_session = session_with_price(3000, h.clock.now());
    h.store.insert_session(other_session.clone()).await;
    let a1 = h.store.seed_seat(h.session.id, "A1").await;
    let b1 = h.store.seed_seat(other_session.id, "B1").await;

    let err = h.engine.create_reservation(request(&[a1.id, b1.id], "u1")).await.unwrap_err();

    assert_eq!(err, Error::CrossSessionRequest);
    assert_eq!(h.store.seat(a1.id).await.unwrap().status, SeatStatus::Available);
    assert_eq!(h.store.seat(b1.id).await.unwrap().status, SeatStatus::Available);
    assert!(h.bus.published().is_empty());
    assert!(h.cache.invalidations().is_empty());
}

#[tokio::test]
async fn validation_errors_take_no_locks() {
    let h = harness();

    let err = h.engine.create_reservation(request(&[], "u1")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let seat = h.store.seed_seat(h.session.id, "A1").await;
    let err = h.engine.create_reservation(request(&[seat.id], "")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(h.locks.acquire_calls(), 0);
}

#[tokio::test]
async fn unknown_seat_fails_validation() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;

    let err = h
        .engine
        .create_reservation(request(&[seatlock_core::SeatId::new()], "u1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn n_concurrent_attempts_on_one_seat_yield_exactly_one_winner() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = h.engine.clone();
        let seat_id = seat.id;
        handles.push(tokio::spawn(async move {
            engine.create_reservation(request(&[seat_id], &format!("u{i}"))).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => winners += 1,
            Err(err) => assert!(
                err.is_retryable(),
                "losers must fail with a retryable conflict, got: {err:?}"
            ),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Reserved);
    assert_eq!(h.store.reservations_for_seat(seat.id).await.len(), 1);
}

#[tokio::test]
async fn overlapping_requests_acquire_locks_in_identical_sorted_order() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let a = h.store.seed_seat(h.session.id, "A1").await;
    let b = h.store.seed_seat(h.session.id, "A2").await;
    let c = h.store.seed_seat(h.session.id, "A3").await;

    // Overlapping seat sets, submitted in opposite per-request orderings.
    let first = h.engine.create_reservation(request(&[b.id, a.id], "u1")).await;
    let second = h.engine.create_reservation(request(&[a.id, c.id], "u2")).await;
    assert!(first.is_ok());
    assert!(second.is_err(), "overlap on an already-reserved seat");

    let log = h.locks.acquisition_log();
    assert_eq!(log.len(), 2, "both requests reached lock acquisition");
    for acquisition in &log {
        let mut sorted = acquisition.clone();
        sorted.sort();
        assert_eq!(acquisition, &sorted, "realized order must be canonical");
    }

    let shared = ResourceKey::seat(a.id);
    for acquisition in &log {
        assert!(acquisition.contains(&shared.as_str().to_string()));
    }
}

#[tokio::test]
async fn lock_exhaustion_fails_closed_with_nothing_held() {
    let locks = Arc::new(InMemoryLockCoordinator::new(2, Duration::from_millis(1)));
    let h = harness_with_locks(locks.clone());
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let foreign = locks.hold_externally(&[ResourceKey::seat(seat.id)]).await;
    let err = h.engine.create_reservation(request(&[seat.id], "u1")).await.unwrap_err();

    assert!(matches!(err, Error::LockUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Available);
    assert!(h.store.reservations_for_seat(seat.id).await.is_empty());

    locks.release(foreign).await;
    h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("retry succeeds");
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn triple_replay_returns_same_reservation_and_locks_once() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let first = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("create");
    let second = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("replay");
    let third = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("replay");

    let id = first.reservations[0].id;
    assert_eq!(second.reservations[0].id, id);
    assert_eq!(third.reservations[0].id, id);
    assert_eq!(h.locks.acquire_calls(), 1, "replays must not acquire the lock");
    assert_eq!(h.store.reservations_for_seat(seat.id).await.len(), 1);
}

#[tokio::test]
async fn replay_of_confirmed_reservation_reports_zero_hold_time() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let created = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("create");
    h.engine.confirm_payment(created.reservations[0].id, None).await.expect("confirm");

    let replay = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("replay");
    assert_eq!(replay.reservations[0].id, created.reservations[0].id);
    assert_eq!(replay.expires_in_seconds, 0);
}

#[tokio::test]
async fn stale_key_is_cleared_and_reused_by_a_fresh_attempt() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let first = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("create");
    let first_id = first.reservations[0].id;

    // Let the hold lapse and the sweeper release the seat.
    h.clock.advance(chrono::Duration::seconds(31));
    sweep(&h).await;

    let fresh = h
        .engine
        .create_reservation(keyed_request(&[seat.id], "u1", "retry-key"))
        .await
        .expect("fresh attempt after expiry");
    let fresh_id = fresh.reservations[0].id;

    assert_ne!(fresh_id, first_id);
    assert_eq!(h.store.reservation(first_id).await.unwrap().idempotency_key, None);
    assert_eq!(
        h.store.reservation(fresh_id).await.unwrap().idempotency_key,
        Some("retry-key".to_string())
    );
}

// ============================================================================
// Payment confirmation
// ============================================================================

#[tokio::test]
async fn confirm_creates_sale_at_current_ticket_price() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;

    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");
    let reservation_id = created.reservations[0].id;

    // Reprice the session between reservation and confirmation: the sale
    // must charge the price at confirmation time.
    let mut repriced = h.session.clone();
    repriced.ticket_price = Money::from_cents(4200);
    h.store.insert_session(repriced).await;

    let confirmed =
        h.engine.confirm_payment(reservation_id, Some("card".to_string())).await.expect("confirm");

    assert_eq!(confirmed.reservation_id, reservation_id);
    assert_eq!(confirmed.seat_label, "A1");
    assert_eq!(confirmed.amount_paid, Money::from_cents(4200));

    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Sold);
    assert_eq!(
        h.store.reservation(reservation_id).await.unwrap().status,
        ReservationStatus::Confirmed
    );
    let sale = h.store.sale_for_reservation(reservation_id).await.unwrap();
    assert_eq!(sale.id, confirmed.sale_id);
    assert_eq!(sale.payment_method, "card");
    assert_eq!(h.bus.routing_keys(), vec!["reservation.created", "payment.confirmed"]);
}

#[tokio::test]
async fn confirm_defaults_payment_method_when_unspecified() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;
    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");

    h.engine.confirm_payment(created.reservations[0].id, None).await.expect("confirm");

    let sale = h.store.sale_for_reservation(created.reservations[0].id).await.unwrap();
    assert_eq!(sale.payment_method, "not_specified");
}

#[tokio::test]
async fn confirm_twice_fails_and_exactly_one_sale_exists() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;
    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");
    let reservation_id = created.reservations[0].id;

    h.engine.confirm_payment(reservation_id, None).await.expect("first confirm");
    let err = h.engine.confirm_payment(reservation_id, None).await.unwrap_err();

    assert_eq!(
        err,
        Error::NotConfirmable {
            reason: NotConfirmableReason::Status(ReservationStatus::Confirmed)
        }
    );
    assert!(!err.is_retryable());
    assert_eq!(h.store.sales().await.len(), 1);
}

#[tokio::test]
async fn confirm_after_hold_lapses_fails_before_any_sweep() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;
    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");
    let reservation_id = created.reservations[0].id;

    h.clock.advance(chrono::Duration::seconds(31));
    let err = h.engine.confirm_payment(reservation_id, None).await.unwrap_err();

    let expires_at = h.store.reservation(reservation_id).await.unwrap().expires_at;
    assert_eq!(
        err,
        Error::NotConfirmable { reason: NotConfirmableReason::Expired(expires_at) }
    );
    // The sweeper, not a failed confirm, releases the seat.
    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Reserved);
    assert!(h.store.sales().await.is_empty());
}

#[tokio::test]
async fn confirm_unknown_reservation_fails_validation() {
    let h = harness();
    let err = h
        .engine
        .confirm_payment(seatlock_core::ReservationId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_releases_seat_and_is_terminal() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;
    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");
    let reservation_id = created.reservations[0].id;

    let cancelled = h
        .engine
        .cancel_reservation(reservation_id, Some(user("u1")))
        .await
        .expect("cancel");
    assert_eq!(cancelled.session_id, h.session.id);

    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Available);
    assert_eq!(
        h.store.reservation(reservation_id).await.unwrap().status,
        ReservationStatus::Cancelled
    );
    assert_eq!(
        h.bus.routing_keys(),
        vec!["reservation.created", "reservation.cancelled"]
    );

    let err = h.engine.cancel_reservation(reservation_id, None).await.unwrap_err();
    assert_eq!(err, Error::NotCancellable { status: ReservationStatus::Cancelled });

    let err = h.engine.confirm_payment(reservation_id, None).await.unwrap_err();
    assert_eq!(
        err,
        Error::NotConfirmable {
            reason: NotConfirmableReason::Status(ReservationStatus::Cancelled)
        }
    );
}

#[tokio::test]
async fn cancel_enforces_ownership_for_user_requests() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;
    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");

    let err = h
        .engine
        .cancel_reservation(created.reservations[0].id, Some(user("u2")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Reserved);
}

// ============================================================================
// Best-effort side channels
// ============================================================================

#[tokio::test]
async fn publish_failure_never_rolls_back_a_committed_reservation() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let seat = h.store.seed_seat(h.session.id, "A1").await;
    h.bus.set_failing(true);

    let created = h.engine.create_reservation(request(&[seat.id], "u1")).await.expect("create");

    assert_eq!(h.store.seat(seat.id).await.unwrap().status, SeatStatus::Reserved);
    assert!(h.bus.published().is_empty());
    // The commit survived, so the cache invalidation still happened.
    assert_eq!(h.cache.invalidations(), vec![h.session.id]);

    h.bus.set_failing(false);
    h.engine.confirm_payment(created.reservations[0].id, None).await.expect("confirm");
}

// ============================================================================
// End-to-end scenario (seat A1, 30 second TTL)
// ============================================================================

#[tokio::test]
async fn reserve_conflict_confirm_reconfirm_scenario() {
    let h = harness();
    h.store.insert_session(h.session.clone()).await;
    let a1 = h.store.seed_seat(h.session.id, "A1").await;

    // u1 reserves A1.
    let created = h.engine.create_reservation(request(&[a1.id], "u1")).await.expect("r1");
    assert_eq!(created.expires_in_seconds, 30);
    let r1 = created.reservations[0].id;
    assert_eq!(h.store.seat(a1.id).await.unwrap().status, SeatStatus::Reserved);

    // u2 immediately collides.
    let err = h.engine.create_reservation(request(&[a1.id], "u2")).await.unwrap_err();
    assert_eq!(err, Error::SeatUnavailable { seats: vec!["A1".to_string()] });

    // u1 pays.
    let confirmed = h.engine.confirm_payment(r1, None).await.expect("confirm");
    assert_eq!(confirmed.amount_paid, Money::from_cents(2500));
    assert_eq!(h.store.seat(a1.id).await.unwrap().status, SeatStatus::Sold);
    assert_eq!(h.store.reservation(r1).await.unwrap().status, ReservationStatus::Confirmed);

    // A later confirm attempt fails.
    let err = h.engine.confirm_payment(r1, None).await.unwrap_err();
    assert!(matches!(err, Error::NotConfirmable { .. }));
}

async fn sweep(h: &Harness) {
    use seatlock_engine::ExpirationSweeper;
    let sweeper = ExpirationSweeper::new(
        h.store.clone(),
        h.bus.clone(),
        h.cache.clone(),
        h.clock.clone(),
        Duration::from_secs(10),
        500,
    );
    sweeper.run_once().await.expect("sweep");
}
