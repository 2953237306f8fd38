//! In-memory lock coordinator fake.
//!
//! Grants mutual exclusion within one process and records every successful
//! acquisition's realized key order plus the total number of acquire calls,
//! which is what the ordering and idempotent-replay properties assert on.
//! TTLs are accepted but never expire here; a test that wants contention
//! parks keys with [`InMemoryLockCoordinator::hold_externally`].

use async_trait::async_trait;
use seatlock_core::{Lease, LockCoordinator, LockError, ResourceKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;

/// Process-local [`LockCoordinator`] for engine tests.
pub struct InMemoryLockCoordinator {
    held: Mutex<HashMap<String, String>>,
    acquisition_log: StdMutex<Vec<Vec<String>>>,
    acquire_calls: AtomicUsize,
    max_attempts: usize,
    retry_delay: Duration,
}

impl Default for InMemoryLockCoordinator {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(5))
    }
}

impl InMemoryLockCoordinator {
    /// Creates a coordinator with the given retry bounds.
    #[must_use]
    pub fn new(max_attempts: usize, retry_delay: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            acquisition_log: StdMutex::new(Vec::new()),
            acquire_calls: AtomicUsize::new(0),
            max_attempts,
            retry_delay,
        }
    }

    /// Every successful acquisition's realized key order, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the log mutex is poisoned (a previous test panicked).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn acquisition_log(&self) -> Vec<Vec<String>> {
        self.acquisition_log.lock().unwrap().clone()
    }

    /// How many times `acquire` was called, successful or not.
    #[must_use]
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Whether a key is currently held.
    pub async fn is_held(&self, key: &ResourceKey) -> bool {
        self.held.lock().await.contains_key(key.as_str())
    }

    /// Parks keys under a foreign token to simulate external contention;
    /// the returned lease releases them.
    pub async fn hold_externally(&self, keys: &[ResourceKey]) -> Lease {
        let canonical = ResourceKey::canonicalize(keys);
        let lease = Lease::new(canonical.clone());
        let mut held = self.held.lock().await;
        for key in &canonical {
            held.insert(key.as_str().to_string(), lease.token().to_string());
        }
        lease
    }
}

#[async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn acquire(&self, keys: &[ResourceKey], _ttl: Duration) -> Result<Lease, LockError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        let canonical = ResourceKey::canonicalize(keys);

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let mut held = self.held.lock().await;
            if canonical.iter().any(|key| held.contains_key(key.as_str())) {
                continue;
            }

            let lease = Lease::new(canonical.clone());
            for key in &canonical {
                held.insert(key.as_str().to_string(), lease.token().to_string());
            }
            drop(held);

            #[allow(clippy::unwrap_used)]
            self.acquisition_log
                .lock()
                .unwrap()
                .push(canonical.iter().map(|k| k.as_str().to_string()).collect());
            return Ok(lease);
        }

        Err(LockError::Unavailable {
            resources: canonical.iter().map(|k| k.as_str().to_string()).collect(),
        })
    }

    async fn release(&self, lease: Lease) {
        let mut held = self.held.lock().await;
        for key in lease.keys() {
            if held.get(key.as_str()).is_some_and(|token| token == lease.token()) {
                held.remove(key.as_str());
            }
        }
    }
}
