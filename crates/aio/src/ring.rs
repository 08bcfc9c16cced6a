//! The bounded buffer ring shared by a handler and its worker.
//!
//! Terminology follows the writer direction: the control thread *produces*
//! filled buffers, the worker *consumes* them. The reader instantiates the
//! same ring with the roles swapped.
//!
//! Slot arithmetic: the producer's commit target is
//! `(ready_pos + ready_count) % N`. That index is invariant under consumer
//! progress (`ready_pos` advancing and `ready_count` dropping cancel out), so
//! a buffer leased from the free tail always commits back into the slot it
//! was taken from, and the allocation set stays fixed.

use std::os::fd::{AsFd, BorrowedFd};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::buffer::Buffer;
use crate::shm::{allocate, Allocation, ShmFlag};

/// Default number of buffers per ring.
pub const DEFAULT_BUFFER_COUNT: usize = 4;
/// Default capacity of each buffer (128 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Ring geometry and allocation mode.
#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    /// Number of buffers; at least two.
    pub count: usize,
    /// Capacity of each buffer in bytes.
    pub capacity: usize,
    /// Allocation mode.
    pub shm: ShmFlag,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_BUFFER_COUNT,
            capacity: DEFAULT_BUFFER_SIZE,
            shm: ShmFlag::None,
        }
    }
}

/// Result of an operation that does not hand out a buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AioResult {
    /// The operation completed.
    Ok,
    /// The ring is full (or still draining); await the readiness event.
    Wait,
    /// The sticky error flag is set.
    Error,
}

/// Result of [`write`](crate::FileWriter::write): a partial copy is reported
/// through the count.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteResult {
    /// Copied this many bytes (at most one buffer's capacity).
    Ok(usize),
    /// The ring is full; await the readiness event.
    Wait,
    /// The sticky error flag is set.
    Error,
}

/// Result of requesting an empty buffer from the ring.
#[derive(Debug)]
pub enum WriteBufferResult {
    /// An empty buffer to fill and pass to the next call.
    Ok(Buffer),
    /// The ring is full; await the readiness event.
    Wait,
    /// The sticky error flag is set.
    Error,
}

#[derive(Debug)]
pub(crate) struct RingState {
    pub slots: Vec<Option<Buffer>>,
    pub ready_pos: usize,
    pub ready_count: usize,
    /// A buffer is leased to the handler side.
    pub processing: bool,
    /// The handler hit a full (writer) or empty (reader) ring and awaits a
    /// readiness event.
    pub handler_waiting: bool,
    /// Sticky failure flag.
    pub error: bool,
    /// Writer: finalize completed. Reader: end of file reached.
    pub finalized: bool,
    /// Tells the worker to exit.
    pub quit: bool,
}

impl RingState {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn commit_index(&self) -> usize {
        (self.ready_pos + self.ready_count) % self.slots.len()
    }

    /// Commits a buffer at the producer index. Returns `true` when this was
    /// the 0→1 transition, i.e. the consumer may have to be signaled.
    pub fn commit(&mut self, buffer: Buffer) -> bool {
        let index = self.commit_index();
        debug_assert!(self.slots[index].is_none(), "commit into an occupied slot");
        self.slots[index] = Some(buffer);
        self.ready_count += 1;
        self.ready_count == 1
    }

    /// Takes the buffer at the producer index out of the ring.
    pub fn lease_free(&mut self) -> Buffer {
        let index = self.commit_index();
        let mut buffer = self.slots[index]
            .take()
            .expect("free slot without a buffer");
        buffer.clear();
        buffer
    }

    /// Takes the buffer at the consumer index out of the ring.
    pub fn lease_ready(&mut self) -> Buffer {
        debug_assert!(self.ready_count > 0, "lease from an empty ring");
        self.slots[self.ready_pos]
            .take()
            .expect("ready slot without a buffer")
    }

    /// Returns a leased buffer to the producer slot without committing it.
    pub fn restore_free(&mut self, mut buffer: Buffer) {
        buffer.clear();
        let index = self.commit_index();
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(buffer);
    }

    /// Returns a drained buffer to the consumer slot and retires the slot.
    pub fn release_ready(&mut self, mut buffer: Buffer) {
        buffer.clear();
        debug_assert!(self.slots[self.ready_pos].is_none());
        self.slots[self.ready_pos] = Some(buffer);
        self.ready_pos = (self.ready_pos + 1) % self.slots.len();
        self.ready_count -= 1;
    }
}

/// One mutex + one condition variable guarding a ring of buffers.
#[derive(Debug)]
pub(crate) struct Ring {
    state: Mutex<RingState>,
    pub cond: Condvar,
    shared_fd: Option<std::os::fd::OwnedFd>,
    capacity: usize,
}

impl Ring {
    pub fn new(config: RingConfig) -> std::io::Result<Self> {
        let Allocation { buffers, shared_fd } =
            allocate(config.count, config.capacity, config.shm)?;
        Ok(Self {
            state: Mutex::new(RingState {
                slots: buffers.into_iter().map(Some).collect(),
                ready_pos: 0,
                ready_count: 0,
                processing: false,
                handler_waiting: false,
                error: false,
                finalized: false,
                quit: false,
            }),
            cond: Condvar::new(),
            shared_fd,
            capacity: config.capacity,
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().expect("ring mutex poisoned")
    }

    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    pub fn shared_fd(&self) -> Option<BorrowedFd<'_>> {
        self.shared_fd.as_ref().map(AsFd::as_fd)
    }

    /// Producer: commit `last` (if any) and lease the next empty buffer.
    ///
    /// `signal` runs under the lock whenever a commit makes the ring
    /// non-empty.
    pub fn get_write_buffer(
        &self,
        last: Option<Buffer>,
        signal: impl FnOnce(&mut RingState),
    ) -> WriteBufferResult {
        let mut state = self.lock();
        if state.error {
            return WriteBufferResult::Error;
        }

        if state.processing {
            if let Some(last) = last.filter(|b| !b.is_empty()) {
                if state.commit(last) {
                    signal(&mut state);
                }
            }
        }
        if state.ready_count >= state.slot_count() {
            state.handler_waiting = true;
            state.processing = false;
            return WriteBufferResult::Wait;
        }
        state.processing = true;
        WriteBufferResult::Ok(state.lease_free())
    }

    /// Producer: synchronous copy of up to one buffer's worth of `data`.
    pub fn write(&self, data: &[u8], signal: impl FnOnce(&mut RingState)) -> WriteResult {
        let mut state = self.lock();
        if state.error || state.processing {
            return WriteResult::Error;
        }
        if data.is_empty() {
            return WriteResult::Ok(0);
        }
        if state.ready_count >= state.slot_count() {
            state.handler_waiting = true;
            return WriteResult::Wait;
        }
        let mut buffer = state.lease_free();
        let copied = buffer.append(data);
        if state.commit(buffer) {
            signal(&mut state);
        }
        WriteResult::Ok(copied)
    }

    /// Producer: commit `last` without requesting a replacement.
    pub fn retire(&self, last: Option<Buffer>, signal: impl FnOnce(&mut RingState)) -> AioResult {
        let mut state = self.lock();
        if state.error {
            return AioResult::Error;
        }
        if !state.processing {
            return AioResult::Error;
        }
        state.processing = false;
        if let Some(last) = last.filter(|b| !b.is_empty()) {
            if state.commit(last) {
                signal(&mut state);
            }
        }
        AioResult::Ok
    }

    /// Producer: commit any in-flight buffer and drive the end-of-stream
    /// hook once the ring has drained.
    pub fn finalize(
        &self,
        last: Option<Buffer>,
        signal: impl FnOnce(&mut RingState),
        continue_finalize: impl FnOnce() -> bool,
    ) -> AioResult {
        let mut state = self.lock();
        if state.error {
            return AioResult::Error;
        }
        if state.processing {
            if let Some(last) = last.filter(|b| !b.is_empty()) {
                state.processing = false;
                if state.commit(last) {
                    signal(&mut state);
                }
            }
        }
        if state.ready_count > 0 {
            state.handler_waiting = true;
            return AioResult::Wait;
        }
        if continue_finalize() {
            state.finalized = true;
            AioResult::Ok
        } else {
            state.error = true;
            AioResult::Error
        }
    }
}
