//! The transport assembly: socket backend, optional proxy, spill buffer.

use std::io;

use tracing::{debug, trace, warn};
use xfer_core::ProxyKind;

use crate::backend::SocketBackend;
use crate::proxy::{HandshakeProgress, ProxyBackend, ProxyError};

enum Backend {
    Plain(Box<dyn SocketBackend>),
    Proxy(ProxyBackend),
}

/// Outcome of the connection event.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// The transport is usable; notify the protocol layer.
    Connected,
    /// A proxy handshake started; the connected notification follows once
    /// it completes.
    Handshaking,
    /// The connection attempt failed.
    Failed(io::Error),
}

/// Outcome of a read-ready event.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Protocol bytes are available; call [`Transport::read`].
    Payload,
    /// The proxy handshake just completed and was detached; notify the
    /// protocol layer exactly once.
    Connected,
    /// The proxy handshake consumed the bytes and continues.
    Handshaking,
    /// The proxy handshake failed.
    Failed(ProxyError),
}

/// Outcome of [`Transport::send`].
#[derive(Debug)]
pub enum SendOutcome {
    /// Bytes were accepted (directly or into the spill buffer); continuation
    /// is event-driven.
    WouldBlock,
    /// The socket failed; the connection is gone.
    Disconnected(io::Error),
}

/// Owns a socket plus optional proxy backend and serializes outbound bytes
/// with a spill buffer.
pub struct Transport {
    backend: Option<Backend>,
    send_buffer: Vec<u8>,
}

impl Transport {
    /// A transport writing straight to the socket backend.
    #[must_use]
    pub fn direct(backend: Box<dyn SocketBackend>) -> Self {
        Self {
            backend: Some(Backend::Plain(backend)),
            send_buffer: Vec::new(),
        }
    }

    /// A transport that will run a proxy handshake towards
    /// `dest_host:dest_port` before the protocol starts.
    #[must_use]
    pub fn with_proxy(
        backend: Box<dyn SocketBackend>,
        kind: ProxyKind,
        dest_host: impl Into<String>,
        dest_port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend: Some(Backend::Proxy(ProxyBackend::new(
                backend, kind, dest_host, dest_port, user, password,
            ))),
            send_buffer: Vec::new(),
        }
    }

    /// Returns `true` while a proxy backend is attached (handshake not yet
    /// complete).
    #[must_use]
    pub fn has_proxy(&self) -> bool {
        matches!(self.backend, Some(Backend::Proxy(_)))
    }

    /// Returns `true` if unsent bytes are spilled.
    #[must_use]
    pub fn has_spill(&self) -> bool {
        !self.send_buffer.is_empty()
    }

    /// Number of spilled bytes.
    #[must_use]
    pub fn spill_len(&self) -> usize {
        self.send_buffer.len()
    }

    /// Handles the successful connection event: starts the proxy handshake
    /// when one is configured.
    pub fn on_connection(&mut self) -> ConnectOutcome {
        match &mut self.backend {
            Some(Backend::Proxy(proxy)) => match proxy.start() {
                Ok(()) => ConnectOutcome::Handshaking,
                Err(ProxyError::Io(error)) => ConnectOutcome::Failed(error),
                Err(other) => ConnectOutcome::Failed(io::Error::other(other)),
            },
            Some(Backend::Plain(_)) => ConnectOutcome::Connected,
            None => ConnectOutcome::Failed(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Handles a read-ready event. During a proxy handshake the bytes are
    /// consumed here; afterwards the caller reads the payload itself.
    pub fn on_read_ready(&mut self) -> ReadOutcome {
        match &mut self.backend {
            Some(Backend::Proxy(proxy)) => match proxy.on_read() {
                Ok(HandshakeProgress::Done) => {
                    let Some(Backend::Proxy(proxy)) = self.backend.take() else {
                        unreachable!("just matched a proxy backend");
                    };
                    self.backend = Some(Backend::Plain(proxy.detach()));
                    ReadOutcome::Connected
                }
                Ok(HandshakeProgress::InProgress) => ReadOutcome::Handshaking,
                Err(error) => ReadOutcome::Failed(error),
            },
            Some(Backend::Plain(_)) => ReadOutcome::Payload,
            None => ReadOutcome::Failed(ProxyError::Io(io::ErrorKind::NotConnected.into())),
        }
    }

    /// Sends protocol bytes.
    ///
    /// With an empty spill buffer a direct write is attempted; the unsent
    /// remainder spills. With a non-empty spill the bytes are appended
    /// outright; ordering across partial writes is the invariant here.
    pub fn send(&mut self, data: &[u8]) -> SendOutcome {
        if !self.send_buffer.is_empty() {
            self.send_buffer.extend_from_slice(data);
            return SendOutcome::WouldBlock;
        }
        let Some(Backend::Plain(backend)) = &mut self.backend else {
            warn!("send before the transport is connected");
            return SendOutcome::Disconnected(io::ErrorKind::NotConnected.into());
        };
        let mut written = 0;
        loop {
            match backend.write(&data[written..]) {
                Ok(0) => break,
                Ok(count) => {
                    written += count;
                    if written == data.len() {
                        break;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    return SendOutcome::Disconnected(error);
                }
            }
        }
        if written < data.len() {
            trace!(
                spilled = data.len() - written,
                "socket did not accept the full send"
            );
            self.send_buffer.extend_from_slice(&data[written..]);
        }
        SendOutcome::WouldBlock
    }

    /// Flushes the spill buffer; call from write-ready events.
    ///
    /// Returns the number of bytes still spilled, or the fatal error.
    pub fn on_write_ready(&mut self) -> io::Result<usize> {
        match &mut self.backend {
            Some(Backend::Proxy(proxy)) => {
                proxy
                    .on_write_ready()
                    .map_err(|error| match error {
                        ProxyError::Io(io) => io,
                        other => io::Error::other(other),
                    })?;
                Ok(0)
            }
            Some(Backend::Plain(backend)) => {
                while !self.send_buffer.is_empty() {
                    match backend.write(&self.send_buffer) {
                        Ok(0) => break,
                        Ok(count) => {
                            self.send_buffer.drain(..count);
                        }
                        Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                        Err(error) => return Err(error),
                    }
                }
                Ok(self.send_buffer.len())
            }
            None => Ok(0),
        }
    }

    /// Reads protocol payload. Yields `WouldBlock` while a proxy handshake
    /// is still in progress.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.backend {
            Some(Backend::Plain(backend)) => backend.read(buf),
            Some(Backend::Proxy(_)) => Err(io::ErrorKind::WouldBlock.into()),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Drops the backends and clears the spill buffer.
    pub fn reset(&mut self) {
        if self.backend.is_some() || !self.send_buffer.is_empty() {
            debug!(spilled = self.send_buffer.len(), "transport reset");
        }
        self.backend = None;
        self.send_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[test]
    fn partial_write_spills_remainder() {
        let handle = ScriptedBackend::accepting([40]);
        let mut transport = Transport::direct(Box::new(handle.clone()));

        let payload: Vec<u8> = (0..100u8).collect();
        assert!(matches!(transport.send(&payload), SendOutcome::WouldBlock));
        assert_eq!(transport.spill_len(), 60);
        assert_eq!(handle.written(), payload[..40]);

        handle.allow_write(usize::MAX);
        assert_eq!(transport.on_write_ready().unwrap(), 0);
        assert_eq!(handle.written(), payload);
    }

    #[test]
    fn sends_append_behind_existing_spill() {
        let handle = ScriptedBackend::accepting([2]);
        let mut transport = Transport::direct(Box::new(handle.clone()));
        assert!(matches!(transport.send(b"abcd"), SendOutcome::WouldBlock));
        assert!(matches!(transport.send(b"ef"), SendOutcome::WouldBlock));
        assert_eq!(transport.spill_len(), 4);

        handle.allow_write(usize::MAX);
        assert_eq!(transport.on_write_ready().unwrap(), 0);
        assert_eq!(handle.written(), b"abcdef");
    }

    #[test]
    fn fatal_write_error_disconnects() {
        let handle = ScriptedBackend::unlimited();
        handle.fail_next_write(io::ErrorKind::ConnectionReset);
        let mut transport = Transport::direct(Box::new(handle));
        match transport.send(b"payload") {
            SendOutcome::Disconnected(error) => {
                assert_eq!(error.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[test]
    fn fatal_flush_error_surfaces() {
        let handle = ScriptedBackend::accepting([1]);
        let mut transport = Transport::direct(Box::new(handle.clone()));
        assert!(matches!(transport.send(b"xyz"), SendOutcome::WouldBlock));
        handle.fail_next_write(io::ErrorKind::BrokenPipe);
        assert_eq!(
            transport.on_write_ready().unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn proxy_detaches_after_handshake_and_payload_uses_plain_backend() {
        let handle = ScriptedBackend::unlimited();
        let mut transport = Transport::with_proxy(
            Box::new(handle.clone()),
            ProxyKind::Socks5,
            "target.example",
            21,
            "",
            "",
        );
        assert!(transport.has_proxy());
        assert!(matches!(
            transport.on_connection(),
            ConnectOutcome::Handshaking
        ));

        handle.push_inbound([0x05, 0x00].to_vec());
        assert!(matches!(transport.on_read_ready(), ReadOutcome::Handshaking));
        handle.push_inbound([0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 21].to_vec());
        assert!(matches!(transport.on_read_ready(), ReadOutcome::Connected));
        assert!(!transport.has_proxy());

        let before = handle.written().len();
        assert!(matches!(transport.send(b"USER x\r\n"), SendOutcome::WouldBlock));
        assert_eq!(&handle.written()[before..], b"USER x\r\n");

        // Subsequent read-ready events carry protocol payload.
        assert!(matches!(transport.on_read_ready(), ReadOutcome::Payload));
    }

    #[test]
    fn direct_transport_connects_immediately() {
        let handle = ScriptedBackend::unlimited();
        let mut transport = Transport::direct(Box::new(handle));
        assert!(matches!(transport.on_connection(), ConnectOutcome::Connected));
    }

    #[test]
    fn reset_clears_spill_and_backend() {
        let handle = ScriptedBackend::accepting([1]);
        let mut transport = Transport::direct(Box::new(handle));
        assert!(matches!(transport.send(b"abc"), SendOutcome::WouldBlock));
        assert!(transport.has_spill());
        transport.reset();
        assert!(!transport.has_spill());
        assert!(matches!(
            transport.send(b"x"),
            SendOutcome::Disconnected(_)
        ));
    }
}
