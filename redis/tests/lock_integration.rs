//! Integration tests for the Redis lock coordinator against a disposable
//! container.
//!
//! Require a local Docker daemon; `#[ignore]`d by default:
//!
//! `cargo test -p seatlock-redis -- --ignored`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use seatlock_core::{LockCoordinator, LockError, ResourceKey, SeatId};
use seatlock_redis::{LockRetryPolicy, RedisLockCoordinator};
use std::time::Duration;
use testcontainers_modules::redis::Redis;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::ContainerAsync;

async fn coordinator(attempts: u32) -> (RedisLockCoordinator, ContainerAsync<Redis>) {
    let container = Redis::default().start().await.expect("start redis");
    let port = container.get_host_port_ipv4(6379).await.expect("mapped port");
    let url = format!("redis://127.0.0.1:{port}");

    let client = redis::Client::open(url).expect("client");
    let conn = redis::aio::ConnectionManager::new(client).await.expect("connect");
    let locks = RedisLockCoordinator::with_retry(
        conn,
        LockRetryPolicy {
            attempts,
            delay: Duration::from_millis(20),
            jitter: Duration::from_millis(5),
        },
    );
    (locks, container)
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn contended_key_fails_closed_then_succeeds_after_release() {
    let (locks, _server) = coordinator(2).await;
    let key = ResourceKey::seat(SeatId::new());
    let ttl = Duration::from_secs(10);

    let held = locks.acquire(&[key.clone()], ttl).await.expect("first grant");

    let err = locks.acquire(&[key.clone()], ttl).await.expect_err("contended");
    assert!(matches!(err, LockError::Unavailable { .. }));

    locks.release(held).await;
    let regrant = locks.acquire(&[key.clone()], ttl).await.expect("after release");
    locks.release(regrant).await;
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn failed_multi_key_acquisition_leaves_nothing_held() {
    let (locks, _server) = coordinator(1).await;
    let a = ResourceKey::seat(SeatId::new());
    let b = ResourceKey::seat(SeatId::new());
    let ttl = Duration::from_secs(10);

    // Park only one key of the pair under a foreign lease.
    let foreign = locks.acquire(&[b.clone()], ttl).await.expect("foreign hold");

    let err = locks.acquire(&[a.clone(), b.clone()], ttl).await.expect_err("partial conflict");
    assert!(matches!(err, LockError::Unavailable { .. }));

    // The uncontended key must have been rolled back, so it is grantable.
    let regrant = locks.acquire(&[a.clone()], ttl).await.expect("rolled-back key is free");
    locks.release(regrant).await;
    locks.release(foreign).await;
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn release_is_token_checked() {
    let (locks, _server) = coordinator(1).await;
    let key = ResourceKey::seat(SeatId::new());

    // A lease that expires almost immediately.
    let short = locks.acquire(&[key.clone()], Duration::from_millis(50)).await.expect("short");
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The key expired and was regranted to someone else; the stale release
    // must not steal the new holder's lock.
    let second = locks.acquire(&[key.clone()], Duration::from_secs(10)).await.expect("regrant");
    locks.release(short).await;

    let err = locks.acquire(&[key.clone()], Duration::from_secs(10)).await.expect_err("still held");
    assert!(matches!(err, LockError::Unavailable { .. }));
    locks.release(second).await;
}
