//! Proxy handshake backends.
//!
//! A proxy backend wraps the socket backend for the duration of the
//! handshake. The control thread drives it from socket events: write-ready
//! flushes queued handshake bytes, read-ready advances the state machine.
//! Once [`HandshakeProgress::Done`] is reported the backend is detached and
//! the plain socket backend takes its place; the real protocol starts only
//! then.

use std::io;
use std::net::Ipv4Addr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, trace};
use xfer_core::ProxyKind;

use crate::backend::SocketBackend;

/// Error produced by a proxy handshake.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The proxy closed the connection mid-handshake.
    #[error("proxy closed the connection during handshake")]
    UnexpectedClose,
    /// The proxy offered no authentication method we speak.
    #[error("proxy requires an unsupported authentication method ({0:#04x})")]
    UnsupportedAuth(u8),
    /// Username/password authentication was rejected.
    #[error("proxy authentication failed")]
    AuthFailed,
    /// The proxy refused the connect request.
    #[error("proxy rejected the request: {0}")]
    Rejected(String),
    /// The reply violated the proxy protocol.
    #[error("malformed proxy reply")]
    Malformed,
    /// Transport-level failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Progress of an in-flight handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeProgress {
    /// More proxy traffic is required.
    InProgress,
    /// The tunnel is established; detach the backend.
    Done,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Socks5Greeting,
    Socks5Auth,
    Socks5Connect,
    Socks4Connect,
    HttpConnect,
    Done,
}

/// A proxy handshake wrapping the socket backend.
pub struct ProxyBackend {
    inner: Box<dyn SocketBackend>,
    kind: ProxyKind,
    host: String,
    port: u16,
    user: String,
    password: String,
    state: State,
    outbox: Vec<u8>,
    inbox: Vec<u8>,
}

impl ProxyBackend {
    /// Wraps `inner` for a handshake towards `host:port` (the *destination*,
    /// already IDN-converted; the proxy itself was dialed by the caller).
    #[must_use]
    pub fn new(
        inner: Box<dyn SocketBackend>,
        kind: ProxyKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            kind,
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            state: State::Done,
            outbox: Vec::new(),
            inbox: Vec::new(),
        }
    }

    /// Proxy protocol in use.
    #[must_use]
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// Queues the opening request. Call once the TCP connection to the
    /// proxy is up.
    pub fn start(&mut self) -> Result<(), ProxyError> {
        match self.kind {
            ProxyKind::Socks5 => {
                self.state = State::Socks5Greeting;
                if self.user.is_empty() {
                    self.outbox.extend_from_slice(&[0x05, 0x01, 0x00]);
                } else {
                    self.outbox.extend_from_slice(&[0x05, 0x02, 0x00, 0x02]);
                }
            }
            ProxyKind::Socks4 => {
                self.state = State::Socks4Connect;
                self.queue_socks4_connect();
            }
            ProxyKind::Http => {
                self.state = State::HttpConnect;
                self.queue_http_connect();
            }
        }
        self.flush()?;
        Ok(())
    }

    /// Flushes queued handshake bytes; call from write-ready events.
    pub fn on_write_ready(&mut self) -> Result<(), ProxyError> {
        self.flush()
    }

    /// Consumes inbound proxy bytes and advances the handshake.
    pub fn on_read(&mut self) -> Result<HandshakeProgress, ProxyError> {
        let mut chunk = [0u8; 1024];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(ProxyError::UnexpectedClose),
                Ok(read) => self.inbox.extend_from_slice(&chunk[..read]),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return Err(error.into()),
            }
        }
        self.step()
    }

    /// Hands the wrapped socket backend back; the proxy's pass-through role
    /// ends here.
    #[must_use]
    pub fn detach(self) -> Box<dyn SocketBackend> {
        debug!(kind = self.kind.name(), "proxy backend detached");
        self.inner
    }

    fn flush(&mut self) -> Result<(), ProxyError> {
        while !self.outbox.is_empty() {
            match self.inner.write(&self.outbox) {
                Ok(written) => {
                    self.outbox.drain(..written);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<HandshakeProgress, ProxyError> {
        loop {
            match self.state {
                State::Socks5Greeting => {
                    if self.inbox.len() < 2 {
                        return Ok(HandshakeProgress::InProgress);
                    }
                    if self.inbox[0] != 0x05 {
                        return Err(ProxyError::Malformed);
                    }
                    let method = self.inbox[1];
                    self.inbox.drain(..2);
                    match method {
                        0x00 => {
                            self.state = State::Socks5Connect;
                            self.queue_socks5_connect();
                            self.flush()?;
                        }
                        0x02 => {
                            trace!("SOCKS5 proxy requested username/password auth");
                            self.state = State::Socks5Auth;
                            self.queue_socks5_auth();
                            self.flush()?;
                        }
                        other => return Err(ProxyError::UnsupportedAuth(other)),
                    }
                }
                State::Socks5Auth => {
                    if self.inbox.len() < 2 {
                        return Ok(HandshakeProgress::InProgress);
                    }
                    let status = self.inbox[1];
                    self.inbox.drain(..2);
                    if status != 0x00 {
                        return Err(ProxyError::AuthFailed);
                    }
                    self.state = State::Socks5Connect;
                    self.queue_socks5_connect();
                    self.flush()?;
                }
                State::Socks5Connect => {
                    if self.inbox.len() < 4 {
                        return Ok(HandshakeProgress::InProgress);
                    }
                    if self.inbox[0] != 0x05 {
                        return Err(ProxyError::Malformed);
                    }
                    let reply = self.inbox[1];
                    let tail = match self.inbox[3] {
                        0x01 => 4 + 2,
                        0x03 => match self.inbox.get(4) {
                            Some(&len) => 1 + usize::from(len) + 2,
                            None => return Ok(HandshakeProgress::InProgress),
                        },
                        0x04 => 16 + 2,
                        _ => return Err(ProxyError::Malformed),
                    };
                    if self.inbox.len() < 4 + tail {
                        return Ok(HandshakeProgress::InProgress);
                    }
                    self.inbox.drain(..4 + tail);
                    if reply != 0x00 {
                        return Err(ProxyError::Rejected(socks5_reply_text(reply).to_owned()));
                    }
                    self.state = State::Done;
                    return Ok(HandshakeProgress::Done);
                }
                State::Socks4Connect => {
                    if self.inbox.len() < 8 {
                        return Ok(HandshakeProgress::InProgress);
                    }
                    let status = self.inbox[1];
                    self.inbox.drain(..8);
                    if status != 0x5A {
                        return Err(ProxyError::Rejected(format!(
                            "SOCKS4 status {status:#04x}"
                        )));
                    }
                    self.state = State::Done;
                    return Ok(HandshakeProgress::Done);
                }
                State::HttpConnect => {
                    let Some(end) = find_header_end(&self.inbox) else {
                        return Ok(HandshakeProgress::InProgress);
                    };
                    let header = String::from_utf8_lossy(&self.inbox[..end]).into_owned();
                    self.inbox.drain(..end + 4);
                    let status_line = header.lines().next().unwrap_or_default().to_owned();
                    let ok = status_line
                        .split_whitespace()
                        .nth(1)
                        .is_some_and(|code| code.starts_with('2'));
                    if !ok {
                        return Err(ProxyError::Rejected(status_line));
                    }
                    self.state = State::Done;
                    return Ok(HandshakeProgress::Done);
                }
                State::Done => return Ok(HandshakeProgress::Done),
            }
        }
    }

    fn queue_socks5_connect(&mut self) {
        let host = self.host.as_bytes();
        self.outbox
            .extend_from_slice(&[0x05, 0x01, 0x00, 0x03, host.len() as u8]);
        self.outbox.extend_from_slice(host);
        self.outbox.extend_from_slice(&self.port.to_be_bytes());
    }

    fn queue_socks5_auth(&mut self) {
        self.outbox.push(0x01);
        self.outbox.push(self.user.len() as u8);
        self.outbox.extend_from_slice(self.user.as_bytes());
        self.outbox.push(self.password.len() as u8);
        self.outbox.extend_from_slice(self.password.as_bytes());
    }

    fn queue_socks4_connect(&mut self) {
        self.outbox.extend_from_slice(&[0x04, 0x01]);
        self.outbox.extend_from_slice(&self.port.to_be_bytes());
        match self.host.parse::<Ipv4Addr>() {
            Ok(addr) => {
                self.outbox.extend_from_slice(&addr.octets());
                self.outbox.extend_from_slice(self.user.as_bytes());
                self.outbox.push(0x00);
            }
            Err(_) => {
                // SOCKS4a: invalid destination 0.0.0.1, hostname trailer.
                self.outbox.extend_from_slice(&[0, 0, 0, 1]);
                self.outbox.extend_from_slice(self.user.as_bytes());
                self.outbox.push(0x00);
                self.outbox.extend_from_slice(self.host.as_bytes());
                self.outbox.push(0x00);
            }
        }
    }

    fn queue_http_connect(&mut self) {
        let mut request = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
            host = self.host,
            port = self.port,
        );
        if !self.user.is_empty() {
            let credentials = BASE64.encode(format!("{}:{}", self.user, self.password));
            request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
        }
        request.push_str("\r\n");
        self.outbox.extend_from_slice(request.as_bytes());
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

fn socks5_reply_text(reply: u8) -> &'static str {
    match reply {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS5 failure",
    }
}
