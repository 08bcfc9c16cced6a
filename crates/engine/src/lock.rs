//! Process-wide arbitration of directory cache locks.
//!
//! Sibling connections to the same account must not run conflicting
//! mutating operations on the same remote directory concurrently. The
//! arbiter is a single FIFO list of lock records; fairness is positional:
//! a socket may hold a lock only if no strictly earlier record matches its
//! `(server, directory, reason)`, and an unlock wakes exactly the earliest
//! matching waiter by posting an `obtain_lock` event to it.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};
use xfer_core::{Event, EventQueue, RemotePath, ServerInfo, SocketId};

/// Categorical tag distinguishing compatible from conflicting activities on
/// the same directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LockReason {
    /// Listing the directory.
    List,
    /// Creating the directory.
    Mkdir,
}

#[derive(Debug)]
struct LockRecord {
    owner: SocketId,
    queue: Weak<EventQueue>,
    server: ServerInfo,
    directory: RemotePath,
    reason: LockReason,
    waiting: bool,
    count: u32,
}

impl LockRecord {
    fn matches(&self, server: &ServerInfo, directory: &RemotePath, reason: LockReason) -> bool {
        self.server == *server && self.directory == *directory && self.reason == reason
    }
}

/// The process-wide FIFO of lock records.
///
/// Shared through the [`EngineContext`](crate::EngineContext) rather than
/// module-level storage; every mutation happens from a control thread.
#[derive(Debug, Default)]
pub struct LockArbiter {
    records: Mutex<Vec<LockRecord>>,
}

impl LockArbiter {
    /// Creates an empty arbiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire `(server, directory, reason)` for `owner`.
    ///
    /// Appends a waiting record when the socket has none; a socket that
    /// already holds the lock acquires recursively. `holds_lock` is set in
    /// every path so the operation reset releases the lock or cancels the
    /// wait. Returns `false` when a strictly earlier record matches; the
    /// socket stays queued and is woken by an `obtain_lock` event.
    pub fn try_lock(
        &self,
        owner: SocketId,
        queue: &Arc<EventQueue>,
        server: &ServerInfo,
        reason: LockReason,
        directory: &RemotePath,
        holds_lock: &mut bool,
    ) -> bool {
        let mut records = self.lock_records();
        let own = match records.iter().position(|record| record.owner == owner) {
            Some(own) => {
                if records[own].count > 0 {
                    // Recursive acquire by a nested frame.
                    if !*holds_lock {
                        *holds_lock = true;
                        records[own].count += 1;
                    }
                    return true;
                }
                debug_assert!(records[own].waiting);
                debug_assert!(records[own].reason == reason);
                own
            }
            None => {
                records.push(LockRecord {
                    owner,
                    queue: Arc::downgrade(queue),
                    server: server.clone(),
                    directory: directory.clone(),
                    reason,
                    waiting: true,
                    count: 0,
                });
                records.len() - 1
            }
        };

        // Set in any case so that the operation reset unlocks or cancels
        // the lock wait.
        *holds_lock = true;

        if records[..own]
            .iter()
            .any(|record| record.matches(server, directory, reason))
        {
            // Some earlier instance holds or awaits the lock.
            return false;
        }

        records[own].count += 1;
        records[own].waiting = false;
        true
    }

    /// Whether the lock is held or awaited by anyone this socket would have
    /// to queue behind.
    ///
    /// With an own record the answer is immediately `true`; without one the
    /// whole list is scanned. The asymmetry is deliberate and load-bearing
    /// for nested operations re-checking their own lock.
    #[must_use]
    pub fn is_locked(
        &self,
        owner: SocketId,
        server: &ServerInfo,
        reason: LockReason,
        directory: &RemotePath,
    ) -> bool {
        let records = self.lock_records();
        if records.iter().any(|record| record.owner == owner) {
            return true;
        }
        records
            .iter()
            .any(|record| record.matches(server, directory, reason))
    }

    /// Releases the lock held (or awaited) by the current frame.
    ///
    /// Recursive holders just decrement; the outermost release erases the
    /// record and posts a single `obtain_lock` event to the earliest waiter
    /// matching `(server, directory, reason)`.
    pub fn unlock(&self, owner: SocketId, holds_lock: &mut bool) {
        if !*holds_lock {
            return;
        }
        *holds_lock = false;

        let mut records = self.lock_records();
        let Some(own) = records.iter().position(|record| record.owner == owner) else {
            return;
        };

        debug_assert!(!records[own].waiting || records[own].count == 0);
        if !records[own].waiting {
            records[own].count -= 1;
            if records[own].count > 0 {
                return;
            }
        }

        let removed = records.remove(own);
        let Some(next) = records.iter().find(|record| {
            record.matches(&removed.server, &removed.directory, removed.reason)
        }) else {
            return;
        };
        match next.queue.upgrade() {
            Some(queue) => {
                debug!(owner = ?next.owner, "waking next lock waiter");
                queue.post(Event::ObtainLock);
            }
            None => warn!(owner = ?next.owner, "lock waiter's event queue is gone"),
        }
    }

    /// Re-runs the fairness check after an `obtain_lock` event. Promotes
    /// the socket to holder and returns the lock's reason when it is now
    /// first in line; otherwise the socket keeps waiting.
    pub fn obtain_lock_from_event(&self, owner: SocketId) -> Option<LockReason> {
        let mut records = self.lock_records();
        let own = records.iter().position(|record| record.owner == owner)?;
        if !records[own].waiting {
            return None;
        }
        let (server, directory, reason) = {
            let own = &records[own];
            (own.server.clone(), own.directory.clone(), own.reason)
        };
        if records[..own]
            .iter()
            .any(|record| record.matches(&server, &directory, reason))
        {
            // Another instance still comes before us.
            return None;
        }
        records[own].waiting = false;
        records[own].count += 1;
        Some(reason)
    }

    /// Whether this socket is queued behind another lock holder.
    #[must_use]
    pub fn is_waiting(&self, owner: SocketId) -> bool {
        self.lock_records()
            .iter()
            .any(|record| record.owner == owner && record.waiting)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<LockRecord>> {
        self.records.lock().expect("lock list poisoned")
    }
}
