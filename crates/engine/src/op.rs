//! The operation stack contract protocol drivers plug into.

use std::path::PathBuf;
use std::time::SystemTime;

use xfer_core::{
    FileExistsNotification, Message, RemotePath, ReplyCode, ServerInfo,
};

use crate::engine::EngineContext;
use crate::lock::LockReason;
use crate::overwrite;
use crate::socket::SocketInner;

/// Kind of an in-flight operation; selects the user-facing message family
/// at the root-of-stack reset.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OpKind {
    /// Establishing the connection.
    Connect,
    /// Retrieving a directory listing.
    List,
    /// A file transfer in either direction.
    Transfer,
    /// A raw protocol command.
    RawCommand,
    /// Creating a remote directory.
    Mkdir,
    /// Renaming a remote file or directory.
    Rename,
    /// Changing remote permissions.
    Chmod,
    /// Deleting remote files.
    Delete,
    /// Removing a remote directory.
    RemoveDir,
    /// Placeholder for operations the protocol driver does not implement.
    NotSupported,
}

/// Per-frame bookkeeping owned by the stack, not the operation.
#[derive(Debug, Default)]
pub struct FrameState {
    /// The frame acquired (or waits for) a cache lock; the pop path releases
    /// it.
    pub holds_lock: bool,
    /// The frame awaits an asynchronous user reply; dispatch parks until the
    /// reply arrives.
    pub wait_for_async: bool,
}

/// Settings of a single transfer.
#[derive(Clone, Debug)]
pub struct TransferSettings {
    /// Binary (as opposed to ASCII) mode.
    pub binary: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self { binary: true }
    }
}

/// State of a transfer operation, shared between the protocol driver and
/// the overwrite decision engine.
#[derive(Clone, Debug)]
pub struct TransferData {
    /// `true` for downloads.
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
    pub file_time: Option<SystemTime>,
    /// Resume at the existing size instead of overwriting.
    pub resume: bool,
    /// Use `remote_path` directly instead of the current directory.
    pub try_absolute_path: bool,
    /// Whether the wire transfer was actually started.
    pub transfer_initiated: bool,
    /// Mode settings.
    pub transfer_settings: TransferSettings,
}

impl TransferData {
    /// Creates transfer state with unknown sizes and times.
    #[must_use]
    pub fn new(
        download: bool,
        local_file: impl Into<PathBuf>,
        remote_file: impl Into<String>,
        remote_path: RemotePath,
    ) -> Self {
        Self {
            download,
            local_file: local_file.into(),
            remote_file: remote_file.into(),
            remote_path,
            local_size: None,
            remote_size: None,
            file_time: None,
            resume: false,
            try_absolute_path: false,
            transfer_initiated: false,
            transfer_settings: TransferSettings::default(),
        }
    }
}

/// Endpoint override carried by a connect operation.
#[derive(Clone, Debug)]
pub struct ConnectData {
    /// Host to dial instead of the server's.
    pub host: String,
    /// Port to dial.
    pub port: u16,
}

/// A unit of remote work with its own state and lifecycle.
///
/// Operations form a push-down stack on the control socket. `send` drives
/// the next protocol step; a parent learns about a finished child through
/// `subcommand_result`. Both run on the socket's cooperative loop and must
/// not block.
pub trait Operation: Send {
    /// The operation's kind.
    fn kind(&self) -> OpKind;

    /// Drives the next step. [`ReplyCode::CONTINUE`] re-enters the dispatch
    /// loop (typically after [`OpContext::push`]), [`ReplyCode::WOULDBLOCK`]
    /// parks the operation until an event resumes it, anything else ends the
    /// operation with that result.
    fn send(&mut self, cx: &mut OpContext<'_>) -> ReplyCode;

    /// Receives the result of a finished sub-operation. The popped frame is
    /// still alive for inspection and destroyed right after this returns.
    fn subcommand_result(
        &mut self,
        prev: ReplyCode,
        popped: &dyn Operation,
        cx: &mut OpContext<'_>,
    ) -> ReplyCode {
        let _ = (popped, cx);
        debug_assert!(false, "unexpected subcommand result {prev:?}");
        ReplyCode::INTERNALERROR
    }

    /// Transfer state, for operations of kind [`OpKind::Transfer`].
    fn transfer_data(&self) -> Option<&TransferData> {
        None
    }

    /// Mutable transfer state, for operations of kind [`OpKind::Transfer`].
    fn transfer_data_mut(&mut self) -> Option<&mut TransferData> {
        None
    }

    /// Endpoint override, for operations of kind [`OpKind::Connect`].
    fn connect_data(&self) -> Option<&ConnectData> {
        None
    }
}

/// Pushed by the default implementations of unsupported protocol surface.
pub(crate) struct NotSupportedOp;

impl Operation for NotSupportedOp {
    fn kind(&self) -> OpKind {
        OpKind::NotSupported
    }

    fn send(&mut self, _cx: &mut OpContext<'_>) -> ReplyCode {
        ReplyCode::NOTSUPPORTED
    }
}

/// Capabilities an operation may use while being driven.
///
/// Borrows everything of the control socket except the stack itself; pushes
/// are deferred through the context and installed by the dispatch loop.
pub struct OpContext<'a> {
    pub(crate) inner: &'a mut SocketInner,
    pub(crate) frame: &'a mut FrameState,
    pub(crate) pending_push: &'a mut Option<Box<dyn Operation>>,
}

impl OpContext<'_> {
    /// Schedules a sub-operation; it becomes the current operation before
    /// the next dispatch step.
    pub fn push(&mut self, op: Box<dyn Operation>) {
        debug_assert!(self.pending_push.is_none(), "one push per dispatch step");
        *self.pending_push = Some(op);
    }

    /// The engine context.
    #[must_use]
    pub fn engine(&self) -> &EngineContext {
        &self.inner.engine
    }

    /// Emits a user-visible message.
    pub fn log(&mut self, message: Message) {
        self.inner.log_message(message);
    }

    /// The server this socket is connected to.
    #[must_use]
    pub fn current_server(&self) -> Option<&ServerInfo> {
        self.inner.current_server.as_ref()
    }

    /// The current remote working directory, if known.
    #[must_use]
    pub fn current_path(&self) -> Option<&RemotePath> {
        self.inner.current_path.as_ref()
    }

    /// Sets the current remote working directory.
    pub fn set_current_path(&mut self, path: Option<RemotePath>) {
        self.inner.current_path = path;
    }

    /// Renews the liveness stamp.
    pub fn set_alive(&mut self) {
        self.inner.set_alive();
    }

    /// Attempts to take the `(server, directory, reason)` cache lock for the
    /// current frame. `false` means the socket queued behind an earlier
    /// holder and will receive an `obtain_lock` event.
    pub fn try_lock_cache(&mut self, reason: LockReason, directory: &RemotePath) -> bool {
        self.inner.try_lock_cache(self.frame, reason, directory)
    }

    /// Whether any earlier socket holds or awaits the given lock.
    #[must_use]
    pub fn is_locked(&self, reason: LockReason, directory: &RemotePath) -> bool {
        self.inner.is_locked(reason, directory)
    }

    /// Releases the current frame's cache lock, waking the next waiter.
    pub fn unlock_cache(&mut self) {
        self.inner.unlock_cache(self.frame);
    }

    /// Issues an asynchronous request and parks the current frame until the
    /// reply arrives.
    pub fn send_async_request(&mut self, payload: FileExistsNotification) {
        self.inner.send_async_request(self.frame, payload);
    }

    /// Runs the overwrite check for a pending transfer: consults the local
    /// file and the directory cache and, when user input is required, issues
    /// the `file_exists` request and returns [`ReplyCode::WOULDBLOCK`].
    pub fn check_overwrite_file(&mut self, data: &mut TransferData) -> ReplyCode {
        overwrite::check_overwrite(self.inner, self.frame, data)
    }
}
