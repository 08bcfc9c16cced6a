#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `xfer_transport` owns the byte path between a control socket and the
//! network: a [`SocketBackend`] seam over the actual socket, optional proxy
//! backends (SOCKS4, SOCKS5, HTTP `CONNECT`) that wrap it during the
//! handshake, and the [`Transport`] assembly with its spill-buffered send
//! path.
//!
//! # Design
//!
//! The transport is event-driven: the socket's monitor thread posts
//! readiness onto the owning control socket's event queue, and the control
//! thread calls back into [`Transport`] from those events. Outbound bytes
//! take a direct write first; whatever the socket does not accept lands in
//! the spill buffer and is flushed from the next write-ready event, so the
//! operation layer never blocks on the wire.
//!
//! While a proxy is configured the proxy backend performs its handshake on
//! the same byte path; once the handshake succeeds the proxy is *detached*
//! and the plain socket backend takes over. The embedding layer observes a
//! single connected transition either way.
//!
//! # Invariants
//!
//! - Spilled bytes are flushed in order before any new payload reaches the
//!   backend; no byte is dropped or duplicated across partial writes.
//! - A detached proxy never sees another byte.
//! - Any write failure other than `WouldBlock` disconnects the transport.

mod backend;
mod proxy;
mod tcp;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use backend::SocketBackend;
pub use proxy::{HandshakeProgress, ProxyBackend, ProxyError};
pub use tcp::{spawn_connector, SocketMonitor, SpawnedConnector, TcpBackend};
pub use transport::{ConnectOutcome, ReadOutcome, SendOutcome, Transport};
