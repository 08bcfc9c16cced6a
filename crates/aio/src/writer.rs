//! Asynchronous file and memory writers.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};
use xfer_core::{Event, EventQueue, Notification, NotificationQueue, WriterId};

use crate::buffer::Buffer;
use crate::ring::{AioResult, Ring, RingConfig, RingState, WriteBufferResult, WriteResult};
use crate::shm::ShmFlag;

static NEXT_WRITER: AtomicU64 = AtomicU64::new(1);

fn next_writer_id() -> WriterId {
    WriterId(NEXT_WRITER.fetch_add(1, Ordering::Relaxed))
}

/// Describes a file writer before it is opened.
#[derive(Clone, Debug)]
pub struct FileWriterFactory {
    path: PathBuf,
    fsync: bool,
    config: RingConfig,
}

impl FileWriterFactory {
    /// Creates a factory for the given target path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: false,
            config: RingConfig::default(),
        }
    }

    /// Requests an `fsync` once the stream is finalized.
    #[must_use]
    pub const fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Overrides the ring geometry.
    #[must_use]
    pub const fn with_ring_config(mut self, config: RingConfig) -> Self {
        self.config = config;
        self
    }

    /// Size of the target file, if it exists.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }

    /// Opens the writer, creating missing parent directories (each created
    /// directory is announced with a `local_dir_created` notification) and
    /// seeking/truncating to `offset` when resuming.
    pub fn open(
        &self,
        offset: u64,
        handler: Arc<EventQueue>,
        notifications: &NotificationQueue,
        shm: ShmFlag,
    ) -> io::Result<FileWriter> {
        create_parent_dirs(&self.path, notifications)?;

        let mut config = self.config;
        config.shm = shm;
        let ring = Arc::new(Ring::new(config)?);

        let mut file = if offset > 0 {
            let file = OpenOptions::new().write(true).create(true).open(&self.path)?;
            file.set_len(offset)?;
            file
        } else {
            File::create(&self.path)?
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        let file = Arc::new(file);

        let id = next_writer_id();
        let worker = {
            let ring = Arc::clone(&ring);
            let file = Arc::clone(&file);
            let handler = Arc::clone(&handler);
            std::thread::spawn(move || writer_worker(&ring, &file, &handler, id))
        };
        debug!(?id, path = %self.path.display(), offset, "file writer opened");

        Ok(FileWriter {
            ring,
            id,
            handler,
            worker: Some(worker),
            file,
            fsync: self.fsync,
            path: self.path.clone(),
        })
    }
}

/// Finds the outermost missing ancestor, creates the chain, and notifies
/// once per directory actually created.
fn create_parent_dirs(path: &Path, notifications: &NotificationQueue) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    let mut missing = vec![parent.to_path_buf()];
    while let Some(ancestor) = missing.last().expect("non-empty").parent() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        missing.push(ancestor.to_path_buf());
    }
    fs::create_dir_all(parent)?;
    for created in missing.into_iter().rev() {
        notifications.add(Notification::LocalDirCreated { path: created });
    }
    Ok(())
}

/// A file writer backed by one worker thread.
///
/// The handler thread commits buffers; the worker performs the blocking
/// writes with the ring lock released. `wait` results are resolved by a
/// `WriteReady` event on the handler queue.
pub struct FileWriter {
    ring: Arc<Ring>,
    id: WriterId,
    handler: Arc<EventQueue>,
    worker: Option<JoinHandle<()>>,
    file: Arc<File>,
    fsync: bool,
    path: PathBuf,
}

impl FileWriter {
    /// This writer's identity in `WriteReady` events.
    #[must_use]
    pub fn id(&self) -> WriterId {
        self.id
    }

    /// Target path.
    #[must_use]
    pub fn name(&self) -> &Path {
        &self.path
    }

    /// Capacity of each ring buffer.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.ring.buffer_capacity()
    }

    /// Backing descriptor of a shared-memory allocation.
    #[must_use]
    pub fn shared_fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        self.ring.shared_fd()
    }

    /// Current size of the target file.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    /// Commits `last` (if any) and leases the next empty buffer.
    pub fn get_write_buffer(&mut self, last: Option<Buffer>) -> WriteBufferResult {
        let cond = &self.ring.cond;
        self.ring.get_write_buffer(last, |_| {
            cond.notify_one();
        })
    }

    /// Synchronous variant: copies up to one buffer's capacity.
    pub fn write(&mut self, data: &[u8]) -> WriteResult {
        let cond = &self.ring.cond;
        self.ring.write(data, |_| {
            cond.notify_one();
        })
    }

    /// Commits `last` without requesting a replacement.
    pub fn retire(&mut self, last: Option<Buffer>) -> AioResult {
        let cond = &self.ring.cond;
        self.ring.retire(last, |_| {
            cond.notify_one();
        })
    }

    /// Ends the stream. Returns [`AioResult::Wait`] while buffers are still
    /// draining; once drained, runs the sync hook and marks the stream
    /// finalized.
    pub fn finalize(&mut self, last: Option<Buffer>) -> AioResult {
        let cond = &self.ring.cond;
        let file = Arc::clone(&self.file);
        let fsync = self.fsync;
        self.ring.finalize(
            last,
            |_| {
                cond.notify_one();
            },
            move || {
                if fsync {
                    if let Err(error) = file.sync_all() {
                        warn!(%error, "fsync failed");
                        return false;
                    }
                }
                true
            },
        )
    }

    /// Stops the worker, joins it, and purges queued `WriteReady` events for
    /// this writer so the handler never observes readiness after close.
    pub fn close(&mut self) {
        {
            let mut state = self.ring.lock();
            state.quit = true;
            self.ring.cond.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(id = ?self.id, "writer worker panicked");
            }
        }
        self.ring.lock().ready_count = 0;
        let id = self.id;
        self.handler
            .filter(|event| !matches!(event, Event::WriteReady(ready) if *ready == id));
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_worker(ring: &Ring, file: &File, handler: &EventQueue, id: WriterId) {
    let mut state = ring.lock();
    while !state.quit && !state.error {
        if state.ready_count == 0 {
            if state.handler_waiting {
                state.handler_waiting = false;
                handler.post(Event::WriteReady(id));
                break;
            }
            state = ring
                .cond
                .wait(state)
                .expect("ring mutex poisoned");
            continue;
        }

        let mut buffer = state.lease_ready();
        let mut failed = false;
        while !buffer.is_empty() {
            drop(state);
            let result = (&*file).write(buffer.as_slice());
            state = ring.lock();
            if state.quit {
                state.release_ready(buffer);
                return;
            }
            match result {
                Ok(0) => {
                    warn!(?id, "file writer made no progress");
                    failed = true;
                    break;
                }
                Ok(written) => buffer.consume(written),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(?id, %error, "file write failed");
                    failed = true;
                    break;
                }
            }
        }
        state.release_ready(buffer);
        if failed {
            state.error = true;
        }

        if state.handler_waiting {
            state.handler_waiting = false;
            handler.post(Event::WriteReady(id));
        }
    }
}

/// Describes a memory writer before it is opened.
#[derive(Clone, Debug)]
pub struct MemoryWriterFactory {
    name: String,
    result: Arc<Mutex<Vec<u8>>>,
    size_limit: Option<usize>,
    config: RingConfig,
}

impl MemoryWriterFactory {
    /// Creates a factory collecting into `result`.
    #[must_use]
    pub fn new(name: impl Into<String>, result: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            name: name.into(),
            result,
            size_limit: None,
            config: RingConfig::default(),
        }
    }

    /// Caps the collected size; exceeding it sets the sticky error.
    #[must_use]
    pub const fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Opens the writer. Memory targets cannot resume, so a nonzero
    /// `offset` is rejected.
    pub fn open(&self, offset: u64, shm: ShmFlag) -> io::Result<MemoryWriter> {
        if offset > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "memory writer cannot open at an offset",
            ));
        }
        let mut config = self.config;
        config.shm = shm;
        let ring = Ring::new(config)?;
        self.result.lock().expect("result buffer poisoned").clear();
        Ok(MemoryWriter {
            ring,
            name: self.name.clone(),
            result: Arc::clone(&self.result),
            size_limit: self.size_limit,
            finalized: false,
        })
    }
}

/// Same producer contract as [`FileWriter`], but committed buffers are
/// appended to the user-supplied result buffer inline; there is no worker
/// and no `wait` in steady state.
#[derive(Debug)]
pub struct MemoryWriter {
    ring: Ring,
    name: String,
    result: Arc<Mutex<Vec<u8>>>,
    size_limit: Option<usize>,
    finalized: bool,
}

impl MemoryWriter {
    /// Writer name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes collected so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.result.lock().expect("result buffer poisoned").len()
    }

    fn drain(result: &Mutex<Vec<u8>>, size_limit: Option<usize>, state: &mut RingState) {
        state.ready_count -= 1;
        let buffer = state.slots[state.ready_pos]
            .as_ref()
            .expect("committed slot without a buffer");
        let mut out = result.lock().expect("result buffer poisoned");
        if let Some(limit) = size_limit {
            if buffer.len() > limit.saturating_sub(out.len()) {
                state.error = true;
                return;
            }
        }
        out.extend_from_slice(buffer.as_slice());
    }

    /// Commits `last` (if any) and leases the next empty buffer.
    pub fn get_write_buffer(&mut self, last: Option<Buffer>) -> WriteBufferResult {
        let result = &self.result;
        let limit = self.size_limit;
        self.ring
            .get_write_buffer(last, |state| Self::drain(result, limit, state))
    }

    /// Synchronous variant: copies up to one buffer's capacity.
    pub fn write(&mut self, data: &[u8]) -> WriteResult {
        let result = &self.result;
        let limit = self.size_limit;
        self.ring
            .write(data, |state| Self::drain(result, limit, state))
    }

    /// Commits `last` without requesting a replacement.
    pub fn retire(&mut self, last: Option<Buffer>) -> AioResult {
        let result = &self.result;
        let limit = self.size_limit;
        self.ring
            .retire(last, |state| Self::drain(result, limit, state))
    }

    /// Ends the stream; the collected bytes survive the writer afterwards.
    pub fn finalize(&mut self, last: Option<Buffer>) -> AioResult {
        let result = &self.result;
        let limit = self.size_limit;
        let outcome = self
            .ring
            .finalize(last, |state| Self::drain(result, limit, state), || true);
        if outcome == AioResult::Ok {
            self.finalized = true;
        }
        outcome
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if !self.finalized {
            self.result
                .lock()
                .expect("result buffer poisoned")
                .clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_config() -> RingConfig {
        RingConfig {
            count: 2,
            capacity: 8,
            shm: ShmFlag::None,
        }
    }

    fn drive_commit(writer: &mut FileWriter, handler: &EventQueue, data: &[u8]) {
        let mut remaining = data;
        let mut last: Option<Buffer> = None;
        while !remaining.is_empty() || last.is_some() {
            match writer.get_write_buffer(last.take()) {
                WriteBufferResult::Ok(mut buffer) => {
                    if remaining.is_empty() {
                        let retired = writer.retire(Some(buffer));
                        assert_ne!(retired, AioResult::Error);
                        break;
                    }
                    let copied = buffer.append(remaining);
                    remaining = &remaining[copied..];
                    last = Some(buffer);
                }
                WriteBufferResult::Wait => {
                    let event = handler.wait_next(Duration::from_secs(5));
                    assert!(matches!(event, Some(Event::WriteReady(_))), "worker stalled");
                }
                WriteBufferResult::Error => panic!("writer reported error"),
            }
        }
    }

    fn drive_finalize(writer: &mut FileWriter, handler: &EventQueue) {
        loop {
            match writer.finalize(None) {
                AioResult::Ok => return,
                AioResult::Wait => {
                    let event = handler.wait_next(Duration::from_secs(5));
                    assert!(matches!(event, Some(Event::WriteReady(_))), "worker stalled");
                }
                AioResult::Error => panic!("finalize failed"),
            }
        }
    }

    #[test]
    fn produced_bytes_equal_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let handler = Arc::new(EventQueue::new());
        let notifications = NotificationQueue::new();

        let data: Vec<u8> = (0..10_000u32).map(|v| (v % 251) as u8).collect();
        let mut writer = FileWriterFactory::new(&path)
            .with_ring_config(small_config())
            .open(0, Arc::clone(&handler), &notifications, ShmFlag::None)
            .unwrap();
        drive_commit(&mut writer, &handler, &data);
        drive_finalize(&mut writer, &handler);
        drop(writer);

        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn resume_offset_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.bin");
        fs::write(&path, b"0123456789").unwrap();

        let handler = Arc::new(EventQueue::new());
        let notifications = NotificationQueue::new();
        let mut writer = FileWriterFactory::new(&path)
            .with_ring_config(small_config())
            .open(4, Arc::clone(&handler), &notifications, ShmFlag::None)
            .unwrap();
        drive_commit(&mut writer, &handler, b"abc");
        drive_finalize(&mut writer, &handler);
        drop(writer);

        assert_eq!(fs::read(&path).unwrap(), b"0123abc");
    }

    #[test]
    fn parent_dirs_are_created_and_announced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c/file.bin");
        let handler = Arc::new(EventQueue::new());
        let notifications = NotificationQueue::new();

        let writer = FileWriterFactory::new(&path)
            .open(0, handler, &notifications, ShmFlag::None)
            .unwrap();
        drop(writer);

        let created: Vec<PathBuf> = notifications
            .drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::LocalDirCreated { path } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(
            created,
            vec![
                dir.path().join("a"),
                dir.path().join("a/b"),
                dir.path().join("a/b/c"),
            ]
        );
    }

    #[test]
    fn existing_parents_are_not_announced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        let handler = Arc::new(EventQueue::new());
        let notifications = NotificationQueue::new();
        let writer = FileWriterFactory::new(&path)
            .open(0, handler, &notifications, ShmFlag::None)
            .unwrap();
        drop(writer);
        assert!(notifications.drain().is_empty());
    }

    #[test]
    fn close_purges_pending_ready_events() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(EventQueue::new());
        let notifications = NotificationQueue::new();
        let mut writer = FileWriterFactory::new(dir.path().join("x"))
            .open(0, Arc::clone(&handler), &notifications, ShmFlag::None)
            .unwrap();
        // A stale event as the worker might have posted it right before
        // close.
        handler.post(Event::WriteReady(writer.id()));
        handler.post(Event::ObtainLock);
        writer.close();
        assert!(matches!(handler.try_next(), Some(Event::ObtainLock)));
        assert!(handler.try_next().is_none());
    }

    #[test]
    fn fsync_flag_is_honored_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(EventQueue::new());
        let notifications = NotificationQueue::new();
        let mut writer = FileWriterFactory::new(dir.path().join("synced"))
            .with_fsync(true)
            .open(0, Arc::clone(&handler), &notifications, ShmFlag::None)
            .unwrap();
        drive_commit(&mut writer, &handler, b"data");
        drive_finalize(&mut writer, &handler);
    }

    #[test]
    fn memory_writer_collects_committed_buffers() {
        let result = Arc::new(Mutex::new(Vec::new()));
        let mut writer = MemoryWriterFactory::new("listing", Arc::clone(&result))
            .open(0, ShmFlag::None)
            .unwrap();

        let mut last = None;
        for chunk in [&b"hello "[..], b"world"] {
            match writer.get_write_buffer(last.take()) {
                WriteBufferResult::Ok(mut buffer) => {
                    buffer.append(chunk);
                    last = Some(buffer);
                }
                other => panic!("{other:?}"),
            }
        }
        assert_eq!(writer.retire(last), AioResult::Ok);
        assert_eq!(writer.finalize(None), AioResult::Ok);
        drop(writer);
        assert_eq!(result.lock().unwrap().as_slice(), b"hello world");
    }

    #[test]
    fn memory_writer_enforces_size_limit() {
        let result = Arc::new(Mutex::new(Vec::new()));
        let mut writer = MemoryWriterFactory::new("limited", Arc::clone(&result))
            .with_size_limit(4)
            .open(0, ShmFlag::None)
            .unwrap();
        assert!(matches!(writer.write(b"abc"), WriteResult::Ok(3)));
        // The overflow is detected while the commit is consumed; the sticky
        // error surfaces on the next operation.
        assert!(matches!(writer.write(b"de"), WriteResult::Ok(2)));
        assert_eq!(writer.finalize(None), AioResult::Error);
        drop(writer);
        assert!(result.lock().unwrap().is_empty());
    }

    #[test]
    fn unfinalized_memory_writer_clears_result() {
        let result = Arc::new(Mutex::new(Vec::new()));
        let mut writer = MemoryWriterFactory::new("dropped", Arc::clone(&result))
            .open(0, ShmFlag::None)
            .unwrap();
        assert!(matches!(writer.write(b"abc"), WriteResult::Ok(3)));
        drop(writer);
        assert!(result.lock().unwrap().is_empty());
    }

    #[test]
    fn memory_writer_rejects_offsets() {
        let result = Arc::new(Mutex::new(Vec::new()));
        let error = MemoryWriterFactory::new("offset", result)
            .open(1, ShmFlag::None)
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }
}
