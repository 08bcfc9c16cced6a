//! Reusable byte buffers.

use std::fmt;

use memmap2::MmapMut;

#[derive(Debug)]
pub(crate) enum Storage {
    Heap(Box<[u8]>),
    Shared(MmapMut),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Heap(data) => data,
            Self::Shared(map) => map,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Heap(data) => data,
            Self::Shared(map) => map,
        }
    }
}

/// A fixed-capacity buffer owned by a ring slot or leased out of it.
///
/// Data occupies `storage[start..end]`; consuming advances `start`, appending
/// advances `end`. Both reset to zero when the buffer empties so capacity
/// never shrinks across reuse.
pub struct Buffer {
    storage: Storage,
    start: usize,
    end: usize,
}

impl Buffer {
    /// Allocates a heap-backed buffer.
    #[must_use]
    pub fn heap(capacity: usize) -> Self {
        Self {
            storage: Storage::Heap(vec![0u8; capacity].into_boxed_slice()),
            start: 0,
            end: 0,
        }
    }

    pub(crate) fn shared(map: MmapMut) -> Self {
        Self {
            storage: Storage::Shared(map),
            start: 0,
            end: 0,
        }
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// Bytes currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` when no bytes are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The held bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage.as_slice()[self.start..self.end]
    }

    /// Drops all held bytes.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Copies as much of `data` as fits, returning the number of bytes
    /// copied.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let capacity = self.capacity();
        let take = data.len().min(capacity - self.end);
        self.storage.as_mut_slice()[self.end..self.end + take].copy_from_slice(&data[..take]);
        self.end += take;
        take
    }

    /// Marks `n` leading bytes as consumed.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`len`](Self::len).
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consumed past end of buffer");
        self.start += n;
        if self.start == self.end {
            self.clear();
        }
    }

    /// The unfilled tail, for direct reads into the buffer.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let end = self.end;
        &mut self.storage.as_mut_slice()[end..]
    }

    /// Declares `n` bytes of the spare tail as filled.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the spare capacity.
    pub fn advance(&mut self, n: usize) {
        assert!(self.end + n <= self.capacity(), "advanced past capacity");
        self.end += n;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field(
                "shared",
                &matches!(self.storage, Storage::Shared(_)),
            )
            .finish()
    }
}
