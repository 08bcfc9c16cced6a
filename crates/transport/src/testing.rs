//! Scripted backends for transport and engine tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use crate::backend::SocketBackend;

#[derive(Debug, Default)]
struct ScriptState {
    /// Bytes the backend will accept per `write` call; empty means
    /// `WouldBlock`.
    accepts: VecDeque<usize>,
    /// Everything successfully written.
    written: Vec<u8>,
    /// Inbound chunks handed out by `read`; empty means `WouldBlock`.
    inbound: VecDeque<Vec<u8>>,
    /// `read` reports a peer close once the inbound script is exhausted.
    close_after_inbound: bool,
    /// Error kind the next `write` fails with.
    write_error: Option<io::ErrorKind>,
}

/// A [`SocketBackend`] driven by a script, shared with the test through a
/// handle so written bytes can be inspected and inbound data injected while
/// the transport owns the backend.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBackend {
    /// A backend that accepts everything and never has inbound data.
    #[must_use]
    pub fn unlimited() -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().accepts = VecDeque::from([usize::MAX]);
        backend
    }

    /// A backend accepting the given byte counts, one per `write` call;
    /// afterwards every write reports `WouldBlock`.
    #[must_use]
    pub fn accepting(counts: impl IntoIterator<Item = usize>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().accepts = counts.into_iter().collect();
        backend
    }

    /// Allows `count` more bytes to be written.
    pub fn allow_write(&self, count: usize) {
        self.state.lock().unwrap().accepts.push_back(count);
    }

    /// Queues an inbound chunk for `read`.
    pub fn push_inbound(&self, data: impl Into<Vec<u8>>) {
        self.state.lock().unwrap().inbound.push_back(data.into());
    }

    /// Makes `read` report a peer close once the inbound script runs dry.
    pub fn close_after_inbound(&self) {
        self.state.lock().unwrap().close_after_inbound = true;
    }

    /// Makes the next `write` fail with `kind`.
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().write_error = Some(kind);
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }
}

impl SocketBackend for ScriptedBackend {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.write_error.take() {
            return Err(kind.into());
        }
        let Some(budget) = state.accepts.front_mut() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let take = data.len().min(*budget);
        if *budget == usize::MAX {
            // Unlimited budget never shrinks.
        } else if take == *budget {
            state.accepts.pop_front();
        } else {
            *budget -= take;
        }
        if take == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        state.written.extend_from_slice(&data[..take]);
        Ok(take)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let Some(chunk) = state.inbound.front_mut() else {
            if state.close_after_inbound {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let take = chunk.len().min(buf.len());
        buf[..take].copy_from_slice(&chunk[..take]);
        if take == chunk.len() {
            state.inbound.pop_front();
        } else {
            chunk.drain(..take);
        }
        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_accepts_follow_the_script() {
        let handle = ScriptedBackend::accepting([3, 2]);
        let mut backend = handle.clone();
        assert_eq!(backend.write(b"abcdef").unwrap(), 3);
        assert_eq!(backend.write(b"def").unwrap(), 2);
        assert_eq!(
            backend.write(b"f").unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(handle.written(), b"abcde");
    }

    #[test]
    fn inbound_chunks_split_across_reads() {
        let handle = ScriptedBackend::unlimited();
        handle.push_inbound(b"hello".to_vec());
        let mut backend = handle.clone();
        let mut buf = [0u8; 3];
        assert_eq!(backend.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(backend.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(
            backend.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn close_after_script() {
        let handle = ScriptedBackend::unlimited();
        handle.close_after_inbound();
        let mut backend = handle.clone();
        let mut buf = [0u8; 4];
        assert_eq!(backend.read(&mut buf).unwrap(), 0);
    }
}
