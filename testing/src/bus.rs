//! Recording event bus fake.

use async_trait::async_trait;
use seatlock_core::{DomainEvent, EventPublisher, PublishError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// [`EventPublisher`] that records events in order and can be told to fail,
/// for asserting the best-effort publish contract.
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<DomainEvent>>,
    failing: AtomicBool,
}

impl RecordingEventBus {
    /// Creates an empty recording bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All published events, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the event mutex is poisoned (a previous test panicked).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn published(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Routing keys of all published events, oldest first.
    #[must_use]
    pub fn routing_keys(&self) -> Vec<&'static str> {
        self.published().iter().map(DomainEvent::routing_key).collect()
    }

    /// Makes every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for RecordingEventBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError {
                routing_key: event.routing_key().to_string(),
                reason: "recording bus set to fail".to_string(),
            });
        }
        #[allow(clippy::unwrap_used)]
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
