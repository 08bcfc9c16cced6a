//! Transfer progress tracking.

use std::time::Instant;

/// Progress record of the transfer currently driven by a control socket.
///
/// The engine keeps at most one of these per socket; the root-of-stack reset
/// uses it to embed bytes-transferred and elapsed time into the final
/// transfer message.
#[derive(Clone, Copy, Debug)]
pub struct TransferStatus {
    /// When the transfer was started.
    pub started: Instant,
    /// Offset the transfer began at (nonzero when resuming).
    pub start_offset: u64,
    /// Current offset.
    pub current_offset: u64,
    /// Whether any payload bytes moved.
    pub made_progress: bool,
}

impl TransferStatus {
    /// Creates a status record starting at `start_offset`.
    #[must_use]
    pub fn new(start_offset: u64) -> Self {
        Self {
            started: Instant::now(),
            start_offset,
            current_offset: start_offset,
            made_progress: false,
        }
    }

    /// Records transferred bytes.
    pub fn advance(&mut self, bytes: u64) {
        self.current_offset += bytes;
        if bytes > 0 {
            self.made_progress = true;
        }
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.current_offset.saturating_sub(self.start_offset)
    }
}
