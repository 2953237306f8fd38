//! Recording availability-cache fake.

use async_trait::async_trait;
use seatlock_core::{AvailabilityCache, SessionId};
use std::sync::Mutex;

/// [`AvailabilityCache`] that records which sessions were invalidated.
#[derive(Default)]
pub struct RecordingCache {
    invalidations: Mutex<Vec<SessionId>>,
}

impl RecordingCache {
    /// Creates an empty recording cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invalidated session id, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned (a previous test panicked).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn invalidations(&self) -> Vec<SessionId> {
        self.invalidations.lock().unwrap().clone()
    }
}

#[async_trait]
impl AvailabilityCache for RecordingCache {
    async fn invalidate(&self, session_id: SessionId) {
        #[allow(clippy::unwrap_used)]
        self.invalidations.lock().unwrap().push(session_id);
    }
}
