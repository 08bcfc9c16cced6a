#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `xfer_aio` is the asynchronous file I/O pipeline between the network side
//! of a control socket and the local filesystem: a fixed ring of reusable
//! byte buffers with bounded producer/consumer handoff, plus the file and
//! memory writers and the file reader built on top of it.
//!
//! # Design
//!
//! One mutex and one condition variable guard each ring. The control thread
//! produces (or, for readers, consumes) buffers; one background worker per
//! instance performs the blocking file I/O with the lock released. When the
//! ring fills up the producer receives `wait` and is later woken by a single
//! readiness event on its [`EventQueue`](xfer_core::EventQueue); the
//! commit-then-signal discipline guarantees a consumer that observes a
//! non-zero ready count always finds the slot fully written.
//!
//! Buffers move out of their slots while a side works on them and return to
//! the same slot on commit, so the set of allocations is fixed for the life
//! of the ring. With [`ShmFlag::Memfd`] the allocation is backed by a
//! shared-memory file descriptor suitable for hand-off to child processes.
//!
//! # Invariants
//!
//! - `0 <= ready_count <= N` at all times; the producer writes slot
//!   `(ready_pos + ready_count) % N`, the consumer drains slot `ready_pos`.
//! - The `error` flag is sticky: once set, every operation reports it.
//! - Closing a writer or reader joins its worker and purges readiness events
//!   still queued for it.

mod buffer;
mod reader;
mod ring;
mod shm;
mod writer;

pub use buffer::Buffer;
pub use reader::{FileReader, FileReaderFactory, ReadResult};
pub use ring::{AioResult, RingConfig, WriteBufferResult, WriteResult, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE};
pub use shm::ShmFlag;
pub use writer::{FileWriter, FileWriterFactory, MemoryWriter, MemoryWriterFactory};
