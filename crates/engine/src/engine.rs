//! Engine-wide state shared by every control socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use xfer_core::{DirectoryCache, EngineOptions, NotificationQueue, SocketId};

use crate::lock::LockArbiter;

/// State handed to each control socket at construction: configuration, the
/// directory cache, the notification queue and the process-wide lock list.
///
/// The lock list deliberately lives here rather than in module-level
/// storage, so independent engines (and tests) never observe each other.
#[derive(Debug)]
pub struct EngineContext {
    options: RwLock<EngineOptions>,
    cache: DirectoryCache,
    notifications: NotificationQueue,
    arbiter: LockArbiter,
    next_socket: AtomicU64,
}

impl EngineContext {
    /// Creates an engine context with the given options.
    #[must_use]
    pub fn new(options: EngineOptions) -> Arc<Self> {
        Arc::new(Self {
            options: RwLock::new(options),
            cache: DirectoryCache::new(),
            notifications: NotificationQueue::new(),
            arbiter: LockArbiter::new(),
            next_socket: AtomicU64::new(1),
        })
    }

    /// Snapshot of the current options.
    #[must_use]
    pub fn options(&self) -> EngineOptions {
        self.options.read().expect("options lock poisoned").clone()
    }

    /// Replaces the options; existing sockets pick the change up on their
    /// next timer arm or connect.
    pub fn set_options(&self, options: EngineOptions) {
        *self.options.write().expect("options lock poisoned") = options;
    }

    /// The shared directory cache.
    #[must_use]
    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    /// The notification queue towards the embedding application.
    #[must_use]
    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    /// The process-wide cache lock arbiter.
    #[must_use]
    pub fn arbiter(&self) -> &LockArbiter {
        &self.arbiter
    }

    pub(crate) fn next_socket_id(&self) -> SocketId {
        SocketId(self.next_socket.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn socket_ids_are_unique() {
        let engine = EngineContext::new(EngineOptions::default());
        let a = engine.next_socket_id();
        let b = engine.next_socket_id();
        assert_ne!(a, b);
    }

    #[test]
    fn options_round_trip() {
        let engine = EngineContext::new(EngineOptions::default());
        let updated = EngineOptions::default().with_timeout(Duration::from_secs(5));
        engine.set_options(updated.clone());
        assert_eq!(engine.options(), updated);
    }
}
