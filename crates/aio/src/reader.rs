//! Asynchronous file reader.
//!
//! The dual of the writer: the worker fills ring slots from the file and the
//! handler consumes them. A consumed buffer is handed back on the next
//! [`read`](FileReader::read) call, freeing its slot for the worker.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};
use xfer_core::{Event, EventQueue, ReaderId};

use crate::buffer::Buffer;
use crate::ring::{Ring, RingConfig};
use crate::shm::ShmFlag;

static NEXT_READER: AtomicU64 = AtomicU64::new(1);

fn next_reader_id() -> ReaderId {
    ReaderId(NEXT_READER.fetch_add(1, Ordering::Relaxed))
}

/// Result of [`FileReader::read`].
#[derive(Debug)]
pub enum ReadResult {
    /// A filled buffer; hand it back on the next call.
    Ok(Buffer),
    /// End of file, the empty-buffer case of the readiness contract.
    Eof,
    /// No data buffered yet; await the `ReadReady` event.
    Wait,
    /// The sticky error flag is set.
    Error,
}

/// Describes a file reader before it is opened.
#[derive(Clone, Debug)]
pub struct FileReaderFactory {
    path: PathBuf,
    config: RingConfig,
}

impl FileReaderFactory {
    /// Creates a factory for the given source path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: RingConfig::default(),
        }
    }

    /// Overrides the ring geometry.
    #[must_use]
    pub const fn with_ring_config(mut self, config: RingConfig) -> Self {
        self.config = config;
        self
    }

    /// Size of the source file, if it exists.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }

    /// Opens the reader at `offset` and starts its worker.
    pub fn open(
        &self,
        offset: u64,
        handler: Arc<EventQueue>,
        shm: ShmFlag,
    ) -> io::Result<FileReader> {
        let mut config = self.config;
        config.shm = shm;
        let ring = Arc::new(Ring::new(config)?);

        let mut file = File::open(&self.path)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }

        let id = next_reader_id();
        let worker = {
            let ring = Arc::clone(&ring);
            let handler = Arc::clone(&handler);
            std::thread::spawn(move || reader_worker(&ring, &mut file, &handler, id))
        };
        debug!(?id, path = %self.path.display(), offset, "file reader opened");

        Ok(FileReader {
            ring,
            id,
            handler,
            worker: Some(worker),
            path: self.path.clone(),
        })
    }
}

/// A file reader backed by one worker thread.
#[derive(Debug)]
pub struct FileReader {
    ring: Arc<Ring>,
    id: ReaderId,
    handler: Arc<EventQueue>,
    worker: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl FileReader {
    /// This reader's identity in `ReadReady` events.
    #[must_use]
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Source path.
    #[must_use]
    pub fn name(&self) -> &Path {
        &self.path
    }

    /// Backing descriptor of a shared-memory allocation.
    #[must_use]
    pub fn shared_fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        self.ring.shared_fd()
    }

    /// Hands back the previously leased buffer (if any) and takes the next
    /// filled one.
    pub fn read(&mut self, last: Option<Buffer>) -> ReadResult {
        let mut state = self.ring.lock();
        if state.error {
            return ReadResult::Error;
        }
        if let Some(buffer) = last {
            debug_assert!(state.processing, "hand-back without a lease");
            state.processing = false;
            state.release_ready(buffer);
            // A slot freed up; the worker may be waiting on a full ring.
            self.ring.cond.notify_one();
        }
        if state.ready_count == 0 {
            if state.finalized {
                return ReadResult::Eof;
            }
            state.handler_waiting = true;
            return ReadResult::Wait;
        }
        state.processing = true;
        ReadResult::Ok(state.lease_ready())
    }

    /// Stops the worker, joins it, and purges queued `ReadReady` events for
    /// this reader.
    pub fn close(&mut self) {
        {
            let mut state = self.ring.lock();
            state.quit = true;
            self.ring.cond.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(id = ?self.id, "reader worker panicked");
            }
        }
        self.ring.lock().ready_count = 0;
        let id = self.id;
        self.handler
            .filter(|event| !matches!(event, Event::ReadReady(ready) if *ready == id));
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_worker(ring: &Ring, file: &mut File, handler: &EventQueue, id: ReaderId) {
    let mut state = ring.lock();
    while !state.quit && !state.error {
        if state.ready_count == state.slot_count() {
            state = ring.cond.wait(state).expect("ring mutex poisoned");
            continue;
        }

        let mut buffer = state.lease_free();
        drop(state);
        let result = file.read(buffer.spare_mut());
        state = ring.lock();
        if state.quit {
            state.restore_free(buffer);
            return;
        }
        match result {
            Ok(0) => {
                state.finalized = true;
                state.restore_free(buffer);
                if state.handler_waiting {
                    state.handler_waiting = false;
                    handler.post(Event::ReadReady(id));
                }
                return;
            }
            Ok(read) => {
                buffer.advance(read);
                state.commit(buffer);
                if state.handler_waiting {
                    state.handler_waiting = false;
                    handler.post(Event::ReadReady(id));
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                state.restore_free(buffer);
            }
            Err(error) => {
                warn!(?id, %error, "file read failed");
                state.error = true;
                state.restore_free(buffer);
                if state.handler_waiting {
                    state.handler_waiting = false;
                    handler.post(Event::ReadReady(id));
                }
                return;
            }
        }
    }
}
