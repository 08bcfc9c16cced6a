//! Notifications towards the embedding application.
//!
//! The engine communicates with user space through a queue of
//! [`Notification`] values. Most are fire-and-forget; an [`AsyncRequest`]
//! additionally demands a reply, correlated by its monotonically increasing
//! [`RequestNumber`]. Replies that arrive after the issuing operation is gone
//! are discarded by the control socket, so a stale request number is never an
//! error for the sender.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::message::Message;
use crate::path::RemotePath;

/// Correlates an asynchronous request with its reply.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RequestNumber(
    /// Raw numeric value.
    pub u64,
);

/// Reply to a [`FileExistsNotification`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OverwriteAction {
    /// Overwrite the target unconditionally.
    Overwrite,
    /// Overwrite only if the side being written is strictly older.
    OverwriteNewer,
    /// Overwrite only if the sizes differ or are unknown.
    OverwriteSize,
    /// Overwrite if either the size or the age test would.
    OverwriteSizeOrNewer,
    /// Resume the transfer at the existing size.
    Resume,
    /// Retry under a different target name.
    Rename(String),
    /// Skip this transfer.
    Skip,
}

/// Payload of the `file_exists` asynchronous request.
#[derive(Clone, Debug)]
pub struct FileExistsNotification {
    /// `true` for downloads, `false` for uploads.
    pub download: bool,
    /// Local side of the transfer.
    pub local_file: PathBuf,
    /// Remote file name.
    pub remote_file: String,
    /// Remote directory.
    pub remote_path: RemotePath,
    /// Local size, if known.
    pub local_size: Option<u64>,
    /// Remote size, if known.
    pub remote_size: Option<u64>,
    /// Remote modification time, if known.
    pub remote_time: Option<SystemTime>,
    /// Local modification time, if known.
    pub local_time: Option<SystemTime>,
    /// `true` when the transfer runs in ASCII mode.
    pub ascii: bool,
    /// Whether the existing data allows resuming.
    pub can_resume: bool,
}

/// An asynchronous request awaiting a user reply.
#[derive(Clone, Debug)]
pub struct AsyncRequest {
    /// Correlation number issued by the engine.
    pub number: RequestNumber,
    /// The pending question.
    pub payload: FileExistsNotification,
}

/// A notification emitted by the engine core.
#[derive(Debug)]
pub enum Notification {
    /// A request requiring a reply before the operation proceeds.
    AsyncRequest(AsyncRequest),
    /// A directory's cached listing changed or a listing finished.
    DirectoryListing {
        /// The directory.
        path: RemotePath,
        /// `true` when emitted by a listing operation itself, `false` for
        /// cache updates (e.g. after an upload).
        sent_by_listing: bool,
        /// `true` when the listing operation failed.
        failed: bool,
    },
    /// A local directory was created while opening a writer.
    LocalDirCreated {
        /// The outermost directory actually created.
        path: PathBuf,
    },
    /// A user-visible diagnostic.
    Log(Message),
}

/// Engine-owned notification queue with async request numbering.
///
/// Internally synchronized; writers' worker threads and control threads post
/// concurrently.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    queue: Mutex<VecDeque<Notification>>,
    next_request: AtomicU64,
}

impl NotificationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            next_request: AtomicU64::new(1),
        }
    }

    /// Appends a notification.
    pub fn add(&self, notification: Notification) {
        self.queue
            .lock()
            .expect("notification queue mutex poisoned")
            .push_back(notification);
    }

    /// Removes and returns the oldest notification.
    pub fn next(&self) -> Option<Notification> {
        self.queue
            .lock()
            .expect("notification queue mutex poisoned")
            .pop_front()
    }

    /// Issues the next async request number.
    pub fn next_request_number(&self) -> RequestNumber {
        RequestNumber(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Drains all queued notifications.
    pub fn drain(&self) -> Vec<Notification> {
        self.queue
            .lock()
            .expect("notification queue mutex poisoned")
            .drain(..)
            .collect()
    }
}
