//! Running init controllers, keyed by InitTarget identity.
//!
//! The lock only ever guards map operations; it is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    id: u64,
    token: CancellationToken,
}

/// Proof of a successful insert, held by the task running the controller.
#[derive(Debug)]
pub struct Registration {
    key: String,
    id: u64,
    token: CancellationToken,
}

impl Registration {
    /// Token that stops the controller.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Cancellation handles of all running init controllers.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a controller is registered for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of registered controllers.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no controller is registered.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Registers a controller for `key` with a token derived from `parent`.
    ///
    /// Returns `None` if `key` is already taken.
    pub fn insert(&self, key: &str, parent: &CancellationToken) -> Option<Registration> {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        entries.insert(
            key.to_string(),
            Entry {
                id,
                token: token.clone(),
            },
        );

        Some(Registration {
            key: key.to_string(),
            id,
            token,
        })
    }

    /// Cancels and forgets the controller for `key`.
    ///
    /// Returns whether there was one; a missing entry is not an error.
    pub fn remove(&self, key: &str) -> bool {
        let entry = self.entries().remove(key);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets `registration` once its controller has stopped.
    ///
    /// A newer registration under the same key is left alone.
    pub fn release(&self, registration: &Registration) {
        let mut entries = self.entries();
        if entries.get(&registration.key).is_some_and(|e| e.id == registration.id) {
            entries.remove(&registration.key);
        }
    }
}
