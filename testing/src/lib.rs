//! # Seatlock Testing
//!
//! In-memory fakes and helpers for exercising the reservation engine and
//! state machines without Postgres, Redis, or a message bus:
//!
//! - [`InMemoryStore`]: transactional store with staged writes, coarse
//!   row-lock modeling, and unique-constraint enforcement.
//! - [`InMemoryLockCoordinator`]: process-local locks that record realized
//!   acquisition order and call counts.
//! - [`RecordingEventBus`] / [`RecordingCache`]: capture best-effort side
//!   channels, with failure injection on the bus.
//! - [`FixedClock`] / [`ManualClock`]: deterministic time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod cache;
pub mod clock;
pub mod lock;
pub mod store;

pub use bus::RecordingEventBus;
pub use cache::RecordingCache;
pub use clock::{test_clock, FixedClock, ManualClock};
pub use lock::InMemoryLockCoordinator;
pub use store::{session_with_price, user, InMemoryStore, InMemoryTxn};
