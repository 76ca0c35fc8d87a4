//! Per-connection client cache.
//!
//! Each key owns a [`OnceCell`], so the check-construct-store sequence runs
//! at most once per key even under concurrent first use. A failed or
//! cancelled initialisation leaves the cell empty and the next caller
//! constructs again.

use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::{GcpError, Result};

type Handle = Arc<dyn Any + Send + Sync>;
type Slot = Arc<OnceCell<Handle>>;

/// Key/value store of constructed clients, scoped to one connection.
#[derive(Default)]
pub struct ConnectionCache {
    slots: Mutex<HashMap<&'static str, Slot>>,
}

impl ConnectionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &'static str) -> Slot {
        self.slots.lock().entry(key).or_default().clone()
    }

    /// Get an initialised entry.
    pub fn get<T: Send + Sync + 'static>(&self, key: &'static str) -> Result<Option<Arc<T>>> {
        let handle = self
            .slots
            .lock()
            .get(key)
            .and_then(|slot| slot.get().cloned());
        handle.map(|handle| downcast(key, handle)).transpose()
    }

    /// Return the entry for `key`, running `init` to create it if absent.
    ///
    /// Concurrent callers for the same key wait for a single `init`; an
    /// error is returned to the caller whose `init` failed and is not stored.
    pub async fn get_or_try_init<T, F, Fut>(&self, key: &'static str, init: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.slot(key);
        let handle = slot
            .get_or_try_init(|| async move {
                let value = init().await?;
                Ok::<Handle, GcpError>(Arc::new(value))
            })
            .await?;
        downcast(key, handle.clone())
    }

    /// Check whether `key` holds a constructed value.
    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.initialized())
    }

    /// Keys holding constructed values, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of constructed values.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Check if no value has been constructed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the entry for `key`. Returns whether a constructed value was removed.
    ///
    /// Callers already holding the handle keep it; the next resolution
    /// constructs a fresh one.
    pub fn evict(&self, key: &str) -> bool {
        self.slots
            .lock()
            .remove(key)
            .is_some_and(|slot| slot.initialized())
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("keys", &self.keys())
            .finish()
    }
}

fn downcast<T: Send + Sync + 'static>(key: &'static str, handle: Handle) -> Result<Arc<T>> {
    handle
        .downcast::<T>()
        .map_err(|_| GcpError::CacheTypeMismatch {
            key,
            expected: type_name::<T>(),
        })
}
