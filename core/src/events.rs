//! Outbound domain events and the publish seam.
//!
//! Publication is fire-and-forget: it happens strictly after commit, its
//! failure is logged by the engine and never rolls back the transaction.

use crate::types::{Money, ReservationId, SaleId, SeatId, SessionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic every engine event is published to.
pub const EVENTS_TOPIC: &str = "cinema.events";

/// State transitions the engine announces to the outside world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// One creation request succeeded; sibling reservations share the
    /// deadline.
    ReservationCreated {
        /// Created reservation ids.
        reservation_ids: Vec<ReservationId>,
        /// Owning session.
        session_id: SessionId,
        /// Reserved seats.
        seat_ids: Vec<SeatId>,
        /// Requesting user.
        user_id: UserId,
        /// Shared hold deadline.
        expires_at: DateTime<Utc>,
    },
    /// A reservation was converted into a sale.
    PaymentConfirmed {
        /// The confirmed reservation.
        reservation_id: ReservationId,
        /// The created sale.
        sale_id: SaleId,
        /// The sold seat.
        seat_id: SeatId,
        /// The purchasing user.
        user_id: UserId,
        /// Amount actually charged.
        amount_paid: Money,
    },
    /// The sweeper expired a stale hold.
    ReservationExpired {
        /// The expired reservation.
        reservation_id: ReservationId,
        /// The released seat.
        seat_id: SeatId,
        /// Owning session.
        session_id: SessionId,
    },
    /// A user or operator explicitly cancelled a hold.
    ReservationCancelled {
        /// The cancelled reservation.
        reservation_id: ReservationId,
        /// The released seat.
        seat_id: SeatId,
        /// Owning session.
        session_id: SessionId,
        /// The reservation's owner.
        user_id: UserId,
    },
}

impl DomainEvent {
    /// Routing key within [`EVENTS_TOPIC`].
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        match self {
            Self::ReservationCreated { .. } => "reservation.created",
            Self::PaymentConfirmed { .. } => "payment.confirmed",
            Self::ReservationExpired { .. } => "reservation.expired",
            Self::ReservationCancelled { .. } => "reservation.cancelled",
        }
    }
}

/// Event publication failure; logged, never propagated into the core result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("publish failed for '{routing_key}': {reason}")]
pub struct PublishError {
    /// Routing key of the failed event.
    pub routing_key: String,
    /// Transport-level reason.
    pub reason: String,
}

/// Fire-and-forget publish seam to the message-bus collaborator.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event to [`EVENTS_TOPIC`].
    ///
    /// # Errors
    ///
    /// [`PublishError`] on transport failure; callers log and move on.
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}
