//! The control socket: operation dispatch, reset, timeout and liveness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error as log_error, info, trace, warn};
use xfer_core::{
    AsyncRequest, Event, EventQueue, FileExistsNotification, Message, Notification,
    OverwriteAction, RemotePath, ReplyCode, ServerInfo, Severity, SocketId, TimerId,
    TransferStatus,
};

use crate::charset::{CharsetConverter, ConversionNote};
use crate::engine::EngineContext;
use crate::lock::LockReason;
use crate::op::{FrameState, NotSupportedOp, OpContext, OpKind, Operation, TransferData};
use crate::overwrite;

/// Everything of a control socket except the operation stack, so dispatch
/// can hand an operation mutable access to both.
pub(crate) struct SocketInner {
    pub id: SocketId,
    pub engine: Arc<EngineContext>,
    pub queue: Arc<EventQueue>,
    pub current_server: Option<ServerInfo>,
    pub current_path: Option<RemotePath>,
    pub invalidate_current_path: bool,
    pub closed: bool,
    pub converter: CharsetConverter,
    pub last_activity: Instant,
    pub timer: Option<TimerId>,
    pub transfer_status: Option<TransferStatus>,
    pub pending_file_exists: Option<FileExistsNotification>,
    pub can_send: bool,
}

impl SocketInner {
    pub fn log_message(&self, message: Message) {
        match message.severity {
            Severity::Status => info!("{}", message.text),
            Severity::Error => log_error!("{}", message.text),
        }
        self.engine
            .notifications()
            .add(Notification::Log(message));
    }

    pub fn set_alive(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn set_wait(&mut self, wait: bool) {
        if wait {
            if self.timer.is_some() {
                return;
            }
            self.last_activity = Instant::now();
            let timeout = self.engine.options().timeout;
            if timeout.is_zero() {
                return;
            }
            // A bit of slack so activity just before the deadline wins.
            self.timer = Some(
                self.queue
                    .add_timer(timeout + Duration::from_millis(100)),
            );
        } else if let Some(timer) = self.timer.take() {
            self.queue.stop_timer(timer);
        }
    }

    pub fn try_lock_cache(
        &mut self,
        frame: &mut FrameState,
        reason: LockReason,
        directory: &RemotePath,
    ) -> bool {
        let Some(server) = self.current_server.as_ref() else {
            debug_assert!(false, "lock attempt without a current server");
            return false;
        };
        self.engine.arbiter().try_lock(
            self.id,
            &self.queue,
            server,
            reason,
            directory,
            &mut frame.holds_lock,
        )
    }

    pub fn is_locked(&self, reason: LockReason, directory: &RemotePath) -> bool {
        let Some(server) = self.current_server.as_ref() else {
            return false;
        };
        self.engine
            .arbiter()
            .is_locked(self.id, server, reason, directory)
    }

    pub fn unlock_cache(&mut self, frame: &mut FrameState) {
        self.engine.arbiter().unlock(self.id, &mut frame.holds_lock);
    }

    pub fn is_waiting_for_lock(&self) -> bool {
        self.engine.arbiter().is_waiting(self.id)
    }

    pub fn send_async_request(
        &mut self,
        frame: &mut FrameState,
        payload: FileExistsNotification,
    ) {
        let number = self.engine.notifications().next_request_number();
        frame.wait_for_async = true;
        self.pending_file_exists = Some(payload.clone());
        self.engine
            .notifications()
            .add(Notification::AsyncRequest(AsyncRequest { number, payload }));
    }
}

pub(crate) struct OpFrame {
    pub op: Box<dyn Operation>,
    pub state: FrameState,
}

/// The per-connection stateful driver sequencing operations against a
/// remote file server.
///
/// All methods run on the socket's cooperative loop; they never block and
/// yield by returning [`ReplyCode::WOULDBLOCK`].
pub struct ControlSocket {
    pub(crate) inner: SocketInner,
    pub(crate) stack: Vec<OpFrame>,
}

impl ControlSocket {
    /// Creates a socket bound to the engine context, with its own event
    /// queue.
    #[must_use]
    pub fn new(engine: Arc<EngineContext>) -> Self {
        let id = engine.next_socket_id();
        Self {
            inner: SocketInner {
                id,
                engine,
                queue: Arc::new(EventQueue::new()),
                current_server: None,
                current_path: None,
                invalidate_current_path: false,
                closed: false,
                converter: CharsetConverter::new(&xfer_core::EncodingType::Auto),
                last_activity: Instant::now(),
                timer: None,
                transfer_status: None,
                pending_file_exists: None,
                can_send: true,
            },
            stack: Vec::new(),
        }
    }

    /// This socket's process-wide identity.
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    /// The socket's event queue; workers and the transport post here.
    #[must_use]
    pub fn queue(&self) -> Arc<EventQueue> {
        Arc::clone(&self.inner.queue)
    }

    /// The engine context this socket was constructed with.
    #[must_use]
    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.inner.engine
    }

    /// The server this socket is associated with.
    #[must_use]
    pub fn current_server(&self) -> Option<&ServerInfo> {
        self.inner.current_server.as_ref()
    }

    /// Associates the socket with a server and rebuilds the charset chain
    /// from its declared encoding.
    pub fn set_current_server(&mut self, server: ServerInfo) {
        self.inner.converter = CharsetConverter::new(&server.encoding);
        self.inner.current_server = Some(server);
        self.inner.closed = false;
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

    /// Whether `do_close` ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed
    }

    /// Number of frames on the operation stack.
    #[must_use]
    pub fn operation_depth(&self) -> usize {
        self.stack.len()
    }

    /// Kind of the operation currently driven, if any.
    #[must_use]
    pub fn current_command_id(&self) -> Option<OpKind> {
        self.stack.last().map(|frame| frame.op.kind())
    }

    /// Gates the dispatch loop; protocol drivers close the gate while a
    /// reply is outstanding on the wire.
    pub fn set_can_send_next_command(&mut self, can_send: bool) {
        self.inner.can_send = can_send;
    }

    /// Pushes an operation; it becomes the current one.
    pub fn push_op(&mut self, op: Box<dyn Operation>) {
        self.stack.push(OpFrame {
            op,
            state: FrameState::default(),
        });
    }

    /// Drives the current operation until it parks, finishes or fails.
    pub fn send_next_command(&mut self) -> ReplyCode {
        trace!("send_next_command");
        if self.stack.is_empty() {
            debug_assert!(false, "send_next_command without an active operation");
            warn!("send_next_command called without active operation");
            self.reset_operation(ReplyCode::ERROR);
            return ReplyCode::ERROR;
        }

        while !self.stack.is_empty() {
            if self
                .stack
                .last()
                .is_some_and(|frame| frame.state.wait_for_async)
            {
                debug!("waiting for async request, ignoring send_next_command");
                return ReplyCode::WOULDBLOCK;
            }
            if !self.inner.can_send {
                self.inner.set_wait(true);
                return ReplyCode::WOULDBLOCK;
            }

            let mut pending_push = None;
            let result = {
                let Self { inner, stack } = self;
                let frame = stack.last_mut().expect("loop guard");
                let OpFrame { op, state } = frame;
                op.send(&mut OpContext {
                    inner,
                    frame: state,
                    pending_push: &mut pending_push,
                })
            };
            if let Some(op) = pending_push {
                self.push_op(op);
            }

            if result == ReplyCode::CONTINUE {
                continue;
            }
            if result == ReplyCode::OK {
                return self.reset_operation(result);
            }
            if result.contains(ReplyCode::DISCONNECTED) {
                return self.do_close(result);
            }
            if result.contains(ReplyCode::ERROR) {
                return self.reset_operation(result);
            }
            if result == ReplyCode::WOULDBLOCK {
                return ReplyCode::WOULDBLOCK;
            }
            warn!(?result, "unknown result returned by operation send");
            return self.reset_operation(ReplyCode::INTERNALERROR);
        }

        ReplyCode::OK
    }

    /// Unwinds the operation stack with `code`.
    ///
    /// Releases the top frame's cache lock, pops the frame, and either
    /// bubbles a completed child into its parent's `subcommand_result`
    /// (`OK`/`ERROR`/`CRITICALERROR`) or propagates the code through the
    /// whole stack (`CANCELED`, `DISCONNECTED`, ...). User-facing messages
    /// are produced only at the root.
    pub fn reset_operation(&mut self, code: ReplyCode) -> ReplyCode {
        trace!(?code, "reset_operation");
        if code.contains(ReplyCode::WOULDBLOCK) {
            warn!(?code, "reset_operation with WOULDBLOCK in code");
        }

        {
            let Self { inner, stack } = self;
            if let Some(frame) = stack.last_mut() {
                if frame.state.holds_lock {
                    inner.unlock_cache(&mut frame.state);
                }
            }
        }

        if self.stack.len() > 1 {
            let popped = self.stack.pop().expect("checked length");
            return if code == ReplyCode::OK
                || code == ReplyCode::ERROR
                || code == ReplyCode::CRITICALERROR
            {
                self.parse_subcommand_result(code, popped)
            } else {
                // Frames die youngest-first while the code propagates.
                drop(popped);
                self.reset_operation(code)
            };
        }

        let top_kind = self.stack.last().map(|frame| frame.op.kind());
        let prefix = if code.is_critical() && top_kind != Some(OpKind::Transfer) {
            "Critical error: "
        } else {
            ""
        };

        if let Some(frame) = self.stack.pop() {
            match frame.op.kind() {
                OpKind::Connect => {
                    if code.is_canceled() {
                        self.inner.log_message(Message::error(format!(
                            "{prefix}Connection attempt interrupted by user"
                        )));
                    } else if !code.is_ok() {
                        self.inner.log_message(Message::error(format!(
                            "{prefix}Could not connect to server"
                        )));
                    }
                }
                OpKind::List => {
                    if code.is_canceled() {
                        self.inner.log_message(Message::error(format!(
                            "{prefix}Directory listing aborted by user"
                        )));
                    } else if !code.is_ok() {
                        self.inner.log_message(Message::error(format!(
                            "{prefix}Failed to retrieve directory listing"
                        )));
                    } else {
                        let text = match &self.inner.current_path {
                            Some(path) => {
                                format!("Directory listing of \"{path}\" successful")
                            }
                            None => "Directory listing successful".to_owned(),
                        };
                        self.inner.log_message(Message::status(text));
                    }
                }
                OpKind::Transfer => {
                    if let Some(data) = frame.op.transfer_data() {
                        if !data.download && data.transfer_initiated {
                            match self.inner.current_server.as_ref() {
                                Some(server) => {
                                    let size =
                                        if code.is_ok() { data.local_size } else { None };
                                    let updated = self.inner.engine.cache().update_file(
                                        server,
                                        &data.remote_path,
                                        &data.remote_file,
                                        size,
                                    );
                                    if updated {
                                        self.inner.engine.notifications().add(
                                            Notification::DirectoryListing {
                                                path: data.remote_path.clone(),
                                                sent_by_listing: false,
                                                failed: false,
                                            },
                                        );
                                    }
                                }
                                None => warn!("transfer reset without a current server"),
                            }
                        }
                        self.log_transfer_result(code, data);
                    }
                }
                _ => {
                    if code.is_canceled() {
                        self.inner
                            .log_message(Message::error(format!("{prefix}Interrupted by user")));
                    }
                }
            }
        } else if !prefix.is_empty() {
            self.inner.log_message(Message::error("Critical error"));
        }

        self.inner.transfer_status = None;
        self.inner.pending_file_exists = None;
        self.inner.set_wait(false);

        if self.inner.invalidate_current_path {
            self.inner.current_path = None;
            self.inner.invalidate_current_path = false;
        }

        code
    }

    /// Delivers a finished child's result to its parent and interprets the
    /// parent's answer.
    fn parse_subcommand_result(&mut self, prev: ReplyCode, popped: OpFrame) -> ReplyCode {
        trace!(?prev, "parse_subcommand_result");
        if self.stack.is_empty() {
            warn!("parse_subcommand_result called without active operation");
            self.reset_operation(ReplyCode::ERROR);
            return ReplyCode::ERROR;
        }

        let mut pending_push = None;
        let result = {
            let Self { inner, stack } = self;
            let frame = stack.last_mut().expect("checked above");
            let OpFrame { op, state } = frame;
            op.subcommand_result(
                prev,
                popped.op.as_ref(),
                &mut OpContext {
                    inner,
                    frame: state,
                    pending_push: &mut pending_push,
                },
            )
        };
        drop(popped);
        if let Some(op) = pending_push {
            self.push_op(op);
        }

        if result == ReplyCode::WOULDBLOCK {
            ReplyCode::WOULDBLOCK
        } else if result == ReplyCode::CONTINUE {
            self.send_next_command()
        } else {
            self.reset_operation(result)
        }
    }

    /// Closes the socket, unwinding the stack with
    /// `ERROR | DISCONNECTED | code`. Idempotent.
    pub fn do_close(&mut self, code: ReplyCode) -> ReplyCode {
        debug!(?code, "do_close");
        if self.inner.closed {
            debug_assert!(self.stack.is_empty());
            return code;
        }
        self.inner.closed = true;
        let code =
            self.reset_operation(ReplyCode::ERROR | ReplyCode::DISCONNECTED | code);
        self.inner.current_server = None;
        code
    }

    /// Cancels the current operation: a connect closes the socket, anything
    /// else unwinds the stack with `CANCELED`.
    pub fn cancel(&mut self) {
        match self.current_command_id() {
            Some(OpKind::Connect) => {
                self.do_close(ReplyCode::CANCELED);
            }
            Some(_) => {
                self.reset_operation(ReplyCode::CANCELED);
            }
            None => {}
        }
    }

    /// Logs the disconnect notice and closes the socket.
    pub fn disconnect(&mut self) -> ReplyCode {
        self.inner
            .log_message(Message::status("Disconnected from server"));
        self.do_close(ReplyCode::OK);
        ReplyCode::OK
    }

    /// Renews the liveness stamp.
    pub fn set_alive(&mut self) {
        self.inner.set_alive();
    }

    /// Arms (or disarms) the inactivity timer.
    pub fn set_wait(&mut self, wait: bool) {
        self.inner.set_wait(wait);
    }

    pub(crate) fn on_timer(&mut self, id: TimerId) {
        if self.inner.timer != Some(id) {
            return;
        }
        // One-shot timer; no need to stop it.
        self.inner.timer = None;
        self.check_timeout(Instant::now());
    }

    /// Evaluates the inactivity timeout at `now`: closes with `TIMEOUT`
    /// when the configured timeout elapsed, rearms for the remainder
    /// otherwise. While an async reply or a cache lock is awaited, time
    /// does not accrue.
    ///
    /// Timer events call this with the current instant; tests may pass a
    /// synthetic one.
    pub fn check_timeout(&mut self, now: Instant) {
        let timeout = self.inner.engine.options().timeout;
        if timeout.is_zero() {
            return;
        }
        let quiescent = self
            .stack
            .last()
            .is_some_and(|frame| frame.state.wait_for_async)
            || self.inner.is_waiting_for_lock();
        let elapsed = if quiescent {
            Duration::ZERO
        } else {
            now.saturating_duration_since(self.inner.last_activity)
        };
        if !quiescent && elapsed >= timeout {
            self.inner.log_message(Message::error(format!(
                "Connection timed out after {} of inactivity",
                seconds_text(timeout.as_secs())
            )));
            self.do_close(ReplyCode::TIMEOUT);
            return;
        }
        self.inner.timer = Some(self.inner.queue.add_timer(timeout - elapsed));
    }

    /// Handles an event addressed to this socket.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Timer(id) => self.on_timer(id),
            Event::ObtainLock => self.on_obtain_lock(),
            other => trace!(?other, "event not handled by the control socket"),
        }
    }

    pub(crate) fn on_obtain_lock(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        if self
            .inner
            .engine
            .arbiter()
            .obtain_lock_from_event(self.inner.id)
            .is_none()
        {
            return;
        }
        self.send_next_command();

        // The lock is held only across a single driven step.
        let Self { inner, stack } = self;
        if let Some(frame) = stack.last_mut() {
            inner.unlock_cache(&mut frame.state);
        }
    }

    /// Runs the overwrite check for the current transfer operation.
    pub fn check_overwrite_file(&mut self) -> ReplyCode {
        let Self { inner, stack } = self;
        let Some(frame) = stack.last_mut() else {
            debug!("empty operation stack in check_overwrite_file");
            return ReplyCode::INTERNALERROR;
        };
        let Some(data) = frame.op.transfer_data_mut() else {
            debug!("check_overwrite_file without transfer data");
            return ReplyCode::INTERNALERROR;
        };
        overwrite::check_overwrite(inner, &mut frame.state, data)
    }

    /// Applies the user's reply to a pending `file_exists` request.
    ///
    /// Returns `false` when no transfer awaits the reply; a late answer
    /// after a reset or cancellation is silently discarded.
    pub fn set_file_exists_action(&mut self, action: OverwriteAction) -> bool {
        overwrite::apply_file_exists_action(self, action)
    }

    /// Starts tracking transfer progress from `start_offset`.
    pub fn start_transfer_status(&mut self, start_offset: u64) {
        self.inner.transfer_status = Some(TransferStatus::new(start_offset));
    }

    /// Records transferred bytes and renews liveness.
    pub fn update_transfer_status(&mut self, bytes: u64) {
        if let Some(status) = &mut self.inner.transfer_status {
            status.advance(bytes);
        }
        self.inner.set_alive();
    }

    /// Progress of the transfer currently driven, if any.
    #[must_use]
    pub fn transfer_status(&self) -> Option<&TransferStatus> {
        self.inner.transfer_status.as_ref()
    }

    /// Clears the current working directory when `path` covers it; deferred
    /// while an operation is in flight.
    pub fn invalidate_current_working_dir(&mut self, path: &RemotePath) {
        let Some(current) = &self.inner.current_path else {
            return;
        };
        if current == path || path.is_parent_of(current, false) {
            if self.stack.is_empty() {
                self.inner.current_path = None;
            } else {
                self.inner.invalidate_current_path = true;
            }
        }
    }

    /// Parses a `PWD`-style reply, tolerating broken quoting, and updates
    /// the current path. Falls back to `default_path` when parsing fails.
    pub fn parse_pwd_reply(
        &mut self,
        reply: &str,
        unquoted: bool,
        default_path: Option<RemotePath>,
    ) -> bool {
        let mut text = reply.to_owned();
        if !unquoted {
            let extracted = extract_quoted(&text, '"').or_else(|| {
                let single = extract_quoted(&text, '\'');
                if single.is_some() {
                    debug!("broken server sending single-quoted path instead of double-quoted path");
                }
                single
            });
            match extracted {
                Some(inner) => {
                    text = inner.replace("\"\"", "\"");
                }
                None => {
                    debug!("no quoted path found in pwd reply, trying first token as path");
                    text = match text.split_once(' ') {
                        Some((_, rest)) => rest
                            .split_once(' ')
                            .map_or_else(|| rest.to_owned(), |(token, _)| token.to_owned()),
                        None => String::new(),
                    };
                }
            }
        }

        match RemotePath::parse(&text) {
            Ok(path) if !text.is_empty() => {
                self.inner.current_path = Some(path);
                true
            }
            _ => {
                if text.is_empty() {
                    self.inner
                        .log_message(Message::error("Server returned empty path."));
                } else {
                    self.inner
                        .log_message(Message::error("Failed to parse returned path."));
                }
                if let Some(default) = default_path {
                    warn!(path = %default, "assuming default path");
                    self.inner.current_path = Some(default);
                    return true;
                }
                false
            }
        }
    }

    /// Converts inbound control bytes through the charset fallback chain,
    /// emitting the one-time degrade notice when UTF-8 gets disabled.
    pub fn convert_to_local(&mut self, bytes: &[u8]) -> String {
        let (text, note) = self.inner.converter.to_local(bytes);
        if note == ConversionNote::DegradedNow {
            self.inner.log_message(Message::status(
                "Invalid character sequence received, disabling UTF-8. \
                 Select UTF-8 option in site manager to force UTF-8.",
            ));
        }
        text
    }

    /// Converts outbound text to server bytes.
    #[must_use]
    pub fn convert_to_server(&self, text: &str, force_utf8: bool) -> Vec<u8> {
        self.inner.converter.to_server(text, force_utf8)
    }

    /// Known timezone offset of the current server's clock.
    #[must_use]
    pub fn server_timezone_offset(&self) -> Option<Duration> {
        self.inner
            .current_server
            .as_ref()
            .and_then(ServerInfo::timezone_offset)
    }

    /// Default listing surface: protocol drivers supporting listings bypass
    /// this and push their own operation.
    pub fn list(&mut self) -> ReplyCode {
        self.push_op(Box::new(NotSupportedOp));
        self.send_next_command()
    }

    /// Default raw-command surface.
    pub fn raw_command(&mut self, _command: &str) -> ReplyCode {
        self.push_op(Box::new(NotSupportedOp));
        self.send_next_command()
    }

    /// Default delete surface.
    pub fn delete(&mut self, _path: &RemotePath, _files: &[String]) -> ReplyCode {
        ReplyCode::NOTSUPPORTED
    }

    /// Default remove-directory surface.
    pub fn remove_dir(&mut self, _path: &RemotePath, _name: &str) -> ReplyCode {
        ReplyCode::NOTSUPPORTED
    }

    /// Default mkdir surface.
    pub fn mkdir(&mut self, _path: &RemotePath) -> ReplyCode {
        ReplyCode::NOTSUPPORTED
    }

    /// Default rename surface.
    pub fn rename(&mut self, _from: &RemotePath, _to: &RemotePath) -> ReplyCode {
        ReplyCode::NOTSUPPORTED
    }

    /// Default chmod surface.
    pub fn chmod(&mut self, _path: &RemotePath, _mode: u32) -> ReplyCode {
        ReplyCode::NOTSUPPORTED
    }

    pub(crate) fn log_message(&self, message: Message) {
        self.inner.log_message(message);
    }

    pub(crate) fn take_pending_file_exists(
        &mut self,
    ) -> Option<(FileExistsNotification, TransferData)> {
        let frame = self.stack.last_mut()?;
        if frame.op.kind() != OpKind::Transfer || !frame.state.wait_for_async {
            return None;
        }
        let data = frame.op.transfer_data()?.clone();
        let notification = self.inner.pending_file_exists.take()?;
        frame.state.wait_for_async = false;
        Some((notification, data))
    }

    pub(crate) fn store_transfer_data(&mut self, data: TransferData) {
        if let Some(frame) = self.stack.last_mut() {
            if let Some(slot) = frame.op.transfer_data_mut() {
                *slot = data;
            }
        }
    }

    pub(crate) fn refresh_transfer_from_cache(&mut self) {
        let Self { inner, stack } = self;
        if let Some(frame) = stack.last_mut() {
            if let Some(data) = frame.op.transfer_data_mut() {
                overwrite::refresh_from_cache(inner, data);
            }
        }
    }

    fn log_transfer_result(&self, code: ReplyCode, data: &TransferData) {
        let status = self
            .inner
            .transfer_status
            .filter(|status| code.is_ok() || status.made_progress);
        if let Some(status) = status {
            let elapsed = status.started.elapsed().as_secs().max(1);
            let time = seconds_text(elapsed);
            let size = format_size(status.transferred());
            let message = if code.is_ok() {
                Message::status(format!(
                    "File transfer successful, transferred {size} in {time}"
                ))
            } else if code.is_canceled() {
                Message::error(format!(
                    "File transfer aborted by user after transferring {size} in {time}"
                ))
            } else if code.is_critical() {
                Message::error(format!(
                    "Critical file transfer error after transferring {size} in {time}"
                ))
            } else {
                Message::error(format!(
                    "File transfer failed after transferring {size} in {time}"
                ))
            };
            self.inner.log_message(message);
        } else if code.is_canceled() {
            self.inner
                .log_message(Message::error("File transfer aborted by user"));
        } else if code.is_ok() {
            if data.transfer_initiated {
                self.inner
                    .log_message(Message::status("File transfer successful"));
            } else {
                self.inner
                    .log_message(Message::status("File transfer skipped"));
            }
        } else if code.is_critical() {
            self.inner
                .log_message(Message::error("Critical file transfer error"));
        } else {
            self.inner
                .log_message(Message::error("File transfer failed"));
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        if !self.inner.closed {
            self.do_close(ReplyCode::OK);
        }
    }
}

fn extract_quoted(text: &str, quote: char) -> Option<String> {
    let first = text.find(quote)?;
    let last = text.rfind(quote)?;
    if first >= last {
        return None;
    }
    Some(text[first + quote.len_utf8()..last].to_owned())
}

fn seconds_text(seconds: u64) -> String {
    if seconds == 1 {
        "1 second".to_owned()
    } else {
        format!("{seconds} seconds")
    }
}

fn format_size(bytes: u64) -> String {
    if bytes == 1 {
        "1 byte".to_owned()
    } else {
        format!("{bytes} bytes")
    }
}
