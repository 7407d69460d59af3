//! Observer registry used for local log fan-out.
//!
//! Handlers run synchronously in registration order. A handler that panics
//! is reported through `tracing` and skipped; the remaining handlers still
//! run and the registry stays usable.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use sentinel_types::LogRecord;

pub type LogListener = dyn Fn(&LogRecord) + Send + Sync;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: Vec<(u64, Arc<LogListener>)>,
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        let listener: Arc<LogListener> = Arc::new(listener);
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, listener));
        tracing::debug!(listener_id = id, total = inner.listeners.len(), "listener registered");
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Invokes every registered listener with `record`. Returns how many of
    /// them panicked.
    pub fn notify(&self, record: &LogRecord) -> usize {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let snapshot = lock(&self.inner)
            .listeners
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect::<Vec<_>>();

        let mut failed = 0;
        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(record))).is_err() {
                failed += 1;
                tracing::warn!(
                    listener_id = id,
                    record_id = %record.id,
                    "log listener panicked; continuing with remaining listeners"
                );
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Revocation handle returned by [`ListenerRegistry::subscribe`]. Dropping it
/// does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<RegistryInner>>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Removes exactly this listener. Repeated calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            lock(&inner).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
