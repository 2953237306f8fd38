//! # Seatlock Redpanda
//!
//! Kafka-compatible, publish-only event bus for the engine's domain events.
//!
//! The engine's bus contract is strictly fire-and-forget: events are
//! published after the transaction commits, delivery is best-effort, and a
//! publish failure is logged by the caller without touching the committed
//! result. Consumption, retry, and dead-letter policy belong to the bus
//! collaborator, so this crate deliberately ships no consumer.
//!
//! Events go to the [`seatlock_core::EVENTS_TOPIC`] topic by default, with
//! the routing key (`reservation.created`, `payment.confirmed`,
//! `reservation.expired`, `reservation.cancelled`) as the message key, so
//! events for one routing key stay ordered within their partition.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use seatlock_core::{DomainEvent, EventPublisher, PublishError, EVENTS_TOPIC};
use std::time::Duration;

/// Error constructing a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfigError(String);

impl std::fmt::Display for PublisherConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "producer configuration failed: {}", self.0)
    }
}

impl std::error::Error for PublisherConfigError {}

/// Publish-only Kafka/Redpanda [`EventPublisher`].
pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl RedpandaPublisher {
    /// Creates a publisher for the default events topic.
    ///
    /// # Errors
    ///
    /// [`PublisherConfigError`] when the underlying producer cannot be
    /// created from the broker list.
    pub fn new(brokers: &str) -> Result<Self, PublisherConfigError> {
        Self::with_topic(brokers, EVENTS_TOPIC)
    }

    /// Creates a publisher for an explicit topic.
    ///
    /// # Errors
    ///
    /// [`PublisherConfigError`] when the underlying producer cannot be
    /// created from the broker list.
    pub fn with_topic(brokers: &str, topic: &str) -> Result<Self, PublisherConfigError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("compression.type", "lz4")
            .create()
            .map_err(|err| PublisherConfigError(err.to_string()))?;

        Ok(Self { producer, topic: topic.to_string(), send_timeout: Duration::from_secs(5) })
    }
}

#[async_trait]
impl EventPublisher for RedpandaPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let routing_key = event.routing_key();
        let payload = serde_json::to_vec(event).map_err(|err| PublishError {
            routing_key: routing_key.to_string(),
            reason: format!("serialization failed: {err}"),
        })?;

        let record = FutureRecord::to(&self.topic).key(routing_key).payload(&payload);
        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(err, _message)| PublishError {
                routing_key: routing_key.to_string(),
                reason: err.to_string(),
            })?;

        tracing::debug!(topic = %self.topic, routing_key, "domain event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<RedpandaPublisher>();
        assert_sync::<RedpandaPublisher>();
    }

    #[test]
    fn config_error_displays_reason() {
        let err = PublisherConfigError("bad broker".to_string());
        assert_eq!(err.to_string(), "producer configuration failed: bad broker");
    }
}
