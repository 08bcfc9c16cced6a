//! Transport-backed control socket.

use std::io;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, warn};
use xfer_core::{
    Event, Message, ProxyOptions, ReaderId, ReplyCode, ServerFormat, ServerInfo, SocketEvent,
    WriterId,
};
use xfer_transport::{
    spawn_connector, ConnectOutcome, ReadOutcome, SendOutcome, SocketMonitor, SpawnedConnector,
    TcpBackend, Transport,
};

use crate::domain::convert_domain_name;
use crate::engine::EngineContext;
use crate::op::OpKind;
use crate::socket::ControlSocket;

/// Seam for the wire-protocol drivers running on top of the engine.
///
/// All callbacks run on the socket's cooperative loop.
pub trait ProtocolHandler: Send {
    /// The transport became usable (after any proxy handshake).
    fn on_connect(&mut self, socket: &mut RealControlSocket) {
        let _ = socket;
    }

    /// Protocol payload is readable from the transport.
    fn on_receive(&mut self, socket: &mut RealControlSocket) {
        let _ = socket;
    }

    /// A writer drained a slot after reporting `wait`.
    fn on_writer_ready(&mut self, socket: &mut RealControlSocket, id: WriterId) {
        let _ = (socket, id);
    }

    /// A reader filled a slot after reporting `wait`.
    fn on_reader_ready(&mut self, socket: &mut RealControlSocket, id: ReaderId) {
        let _ = (socket, id);
    }
}

/// A control socket owning a real transport: TCP backend, optional proxy,
/// readiness monitor.
pub struct RealControlSocket {
    socket: ControlSocket,
    transport: Option<Transport>,
    connector: Option<SpawnedConnector>,
    monitor: Option<SocketMonitor>,
    handler: Option<Box<dyn ProtocolHandler>>,
    pending_proxy: Option<ProxyOptions>,
    destination: Option<(String, u16)>,
}

impl RealControlSocket {
    /// Creates a disconnected socket.
    #[must_use]
    pub fn new(engine: Arc<EngineContext>) -> Self {
        Self {
            socket: ControlSocket::new(engine),
            transport: None,
            connector: None,
            monitor: None,
            handler: None,
            pending_proxy: None,
            destination: None,
        }
    }

    /// Installs the protocol driver.
    pub fn set_handler(&mut self, handler: Box<dyn ProtocolHandler>) {
        self.handler = Some(handler);
    }

    /// Starts connecting to `server`, optionally through the configured
    /// proxy. Progress arrives as socket events.
    pub fn connect(&mut self, server: ServerInfo) -> ReplyCode {
        self.socket.set_current_server(server);
        self.socket.set_wait(true);
        self.continue_connect()
    }

    /// Resolves the endpoint (connect-op override, then server) and spawns
    /// the connector.
    pub fn continue_connect(&mut self) -> ReplyCode {
        let Some(server) = self.socket.current_server().cloned() else {
            warn!("continue_connect without a current server");
            return ReplyCode::INTERNALERROR;
        };
        let options = self.socket.engine().options();

        let (mut host, mut port) = (server.host.clone(), server.port);
        if let Some(data) = self
            .socket
            .current_command_id()
            .filter(|kind| *kind == OpKind::Connect)
            .and_then(|_| self.stack_connect_data())
        {
            host = data.0;
            port = data.1;
        }
        self.destination = Some((convert_domain_name(&host), port));

        let proxy = options.proxy.filter(|_| !server.bypass_proxy);
        let (dial_host, dial_port) = match &proxy {
            Some(proxy) => {
                self.socket.log_message(Message::status(format!(
                    "Connecting to {} through {} proxy",
                    server.format(ServerFormat::WithOptionalPort),
                    proxy.kind.name()
                )));
                (proxy.host.clone(), proxy.port)
            }
            None => (host, port),
        };
        self.pending_proxy = proxy;

        if dial_host.parse::<IpAddr>().is_err() {
            self.socket
                .log_message(Message::status(format!("Resolving address of {dial_host}")));
        }
        let dial_host = convert_domain_name(&dial_host);
        self.connector = Some(spawn_connector(dial_host, dial_port, self.socket.queue()));
        ReplyCode::WOULDBLOCK
    }

    fn stack_connect_data(&self) -> Option<(String, u16)> {
        let frame = self.socket.stack.last()?;
        let data = frame.op.connect_data()?;
        Some((data.host.clone(), data.port))
    }

    /// Sends protocol bytes through the transport, spilling what the socket
    /// does not accept.
    pub fn send(&mut self, data: &[u8]) -> ReplyCode {
        self.socket.set_wait(true);
        let Some(transport) = self.transport.as_mut() else {
            warn!("send without a transport");
            return ReplyCode::ERROR | ReplyCode::DISCONNECTED;
        };
        match transport.send(data) {
            SendOutcome::WouldBlock => {
                if transport.has_spill() {
                    if let Some(monitor) = &self.monitor {
                        monitor.request_write();
                    }
                }
                self.socket.set_alive();
                ReplyCode::WOULDBLOCK
            }
            SendOutcome::Disconnected(error) => {
                self.socket.log_message(Message::error(format!(
                    "Could not write to socket: {error}"
                )));
                self.socket
                    .log_message(Message::error("Disconnected from server"));
                ReplyCode::DISCONNECTED
            }
        }
    }

    /// Reads protocol payload from the transport.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.transport.as_mut() {
            Some(transport) => transport.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Handles an event addressed to this socket.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Socket(socket_event) => self.on_socket_event(socket_event),
            Event::HostAddress(address) => self.on_host_address(&address),
            Event::WriteReady(id) => {
                self.with_handler(|handler, socket| handler.on_writer_ready(socket, id));
            }
            Event::ReadReady(id) => {
                self.with_handler(|handler, socket| handler.on_reader_ready(socket, id));
            }
            other => self.socket.handle_event(other),
        }
    }

    /// Drops the transport, monitor, connector and any spilled bytes.
    pub fn reset_socket(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.shutdown();
        }
        self.connector = None;
        if let Some(mut transport) = self.transport.take() {
            transport.reset();
        }
        self.pending_proxy = None;
    }

    /// Closes the socket: tears the transport down, then unwinds the
    /// operation stack.
    pub fn do_close(&mut self, code: ReplyCode) -> ReplyCode {
        self.reset_socket();
        self.socket.do_close(code)
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        if self.transport.is_none() && self.connector.is_none() {
            return;
        }
        match event {
            SocketEvent::ConnectionNext { error } => {
                if let Some(error) = error {
                    self.socket.log_message(Message::status(format!(
                        "Connection attempt failed with \"{error}\", trying next address."
                    )));
                }
                self.socket.set_alive();
            }
            SocketEvent::Connection { error } => match error {
                Some(error) => {
                    self.socket.log_message(Message::status(format!(
                        "Connection attempt failed with \"{error}\"."
                    )));
                    self.on_close(Some(error));
                }
                None => self.on_connection_established(),
            },
            SocketEvent::Read => self.on_read(),
            SocketEvent::Write => self.on_send(),
            SocketEvent::Close { error } => self.on_close(error),
        }
    }

    fn on_host_address(&mut self, address: &str) {
        if self.transport.is_none() && self.connector.is_none() {
            return;
        }
        self.socket
            .log_message(Message::status(format!("Connecting to {address}...")));
    }

    fn on_connection_established(&mut self) {
        let Some(stream) = self.connector.as_ref().and_then(SpawnedConnector::take_stream)
        else {
            warn!("connection event without a pending stream");
            return;
        };
        self.connector = None;

        let backend = match TcpBackend::new(stream) {
            Ok(backend) => backend,
            Err(error) => {
                self.socket.log_message(Message::error(format!(
                    "Could not connect to server: {error}"
                )));
                self.do_close(ReplyCode::OK);
                return;
            }
        };
        match backend.monitor_stream() {
            Ok(stream) => {
                self.monitor = Some(SocketMonitor::spawn(stream, self.socket.queue()));
            }
            Err(error) => warn!(%error, "socket monitor unavailable"),
        }

        let (dest_host, dest_port) = self
            .destination
            .clone()
            .unwrap_or_else(|| (String::new(), 0));
        let transport = match self.pending_proxy.take() {
            Some(proxy) => Transport::with_proxy(
                Box::new(backend),
                proxy.kind,
                dest_host,
                dest_port,
                proxy.user,
                proxy.password,
            ),
            None => Transport::direct(Box::new(backend)),
        };
        self.install_transport(transport);
    }

    fn install_transport(&mut self, mut transport: Transport) {
        self.socket.set_alive();
        let outcome = transport.on_connection();
        self.transport = Some(transport);
        match outcome {
            ConnectOutcome::Connected => self.notify_connected(),
            ConnectOutcome::Handshaking => {
                debug!("proxy handshake started");
                if let Some(monitor) = &self.monitor {
                    monitor.request_write();
                }
            }
            ConnectOutcome::Failed(error) => {
                self.socket.log_message(Message::error(format!(
                    "Could not start proxy handshake: {error}"
                )));
                self.do_close(ReplyCode::OK);
            }
        }
    }

    fn notify_connected(&mut self) {
        self.with_handler(|handler, socket| handler.on_connect(socket));
    }

    fn on_read(&mut self) {
        self.socket.set_alive();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.on_read_ready() {
            ReadOutcome::Payload => {
                self.with_handler(|handler, socket| handler.on_receive(socket));
            }
            ReadOutcome::Connected => self.notify_connected(),
            ReadOutcome::Handshaking => {}
            ReadOutcome::Failed(error) => {
                self.socket.log_message(Message::error(format!(
                    "Proxy handshake failed: {error}"
                )));
                self.do_close(ReplyCode::OK);
                return;
            }
        }
        if let Some(monitor) = &self.monitor {
            monitor.request_read();
        }
    }

    fn on_send(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.on_write_ready() {
            Ok(0) => {}
            Ok(_still_spilled) => {
                self.socket.set_alive();
                if let Some(monitor) = &self.monitor {
                    monitor.request_write();
                }
            }
            Err(error) => {
                self.socket.log_message(Message::error(format!(
                    "Could not write to socket: {error}"
                )));
                if self.socket.current_command_id() != Some(OpKind::Connect) {
                    self.socket
                        .log_message(Message::error("Disconnected from server"));
                }
                self.do_close(ReplyCode::OK);
            }
        }
    }

    fn on_close(&mut self, error: Option<io::Error>) {
        debug!(?error, "socket closed");
        let command = self.socket.current_command_id();
        if command != Some(OpKind::Connect) {
            let text = match &error {
                None => "Connection closed by server".to_owned(),
                Some(error) => format!("Disconnected from server: {error}"),
            };
            let message = if command.is_none() {
                Message::status(text)
            } else {
                Message::error(text)
            };
            self.socket.log_message(message);
        }
        self.do_close(ReplyCode::OK);
    }

    fn with_handler(&mut self, f: impl FnOnce(&mut dyn ProtocolHandler, &mut Self)) {
        if let Some(mut handler) = self.handler.take() {
            f(handler.as_mut(), self);
            if self.handler.is_none() {
                self.handler = Some(handler);
            }
        }
    }
}

impl Deref for RealControlSocket {
    type Target = ControlSocket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl DerefMut for RealControlSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xfer_core::{EngineOptions, ProxyKind};
    use xfer_transport::testing::ScriptedBackend;

    struct CountingHandler {
        connects: Arc<AtomicUsize>,
    }

    impl ProtocolHandler for CountingHandler {
        fn on_connect(&mut self, _socket: &mut RealControlSocket) {
            self.connects.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn proxied_socket(
        backend: &ScriptedBackend,
    ) -> (RealControlSocket, Arc<AtomicUsize>) {
        let engine = EngineContext::new(EngineOptions::default());
        let mut socket = RealControlSocket::new(engine);
        socket.set_current_server(ServerInfo::new("target.example", 21));
        let connects = Arc::new(AtomicUsize::new(0));
        socket.set_handler(Box::new(CountingHandler {
            connects: Arc::clone(&connects),
        }));
        let transport = Transport::with_proxy(
            Box::new(backend.clone()),
            ProxyKind::Socks5,
            "target.example",
            21,
            "",
            "",
        );
        socket.install_transport(transport);
        (socket, connects)
    }

    #[test]
    fn proxy_handshake_yields_a_single_on_connect() {
        let backend = ScriptedBackend::unlimited();
        let (mut socket, connects) = proxied_socket(&backend);
        assert_eq!(connects.load(Ordering::Relaxed), 0);

        backend.push_inbound([0x05, 0x00].to_vec());
        socket.on_socket_event(SocketEvent::Read);
        assert_eq!(connects.load(Ordering::Relaxed), 0);

        backend.push_inbound([0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 21].to_vec());
        socket.on_socket_event(SocketEvent::Read);
        assert_eq!(connects.load(Ordering::Relaxed), 1);
        assert!(!socket.transport.as_ref().unwrap().has_proxy());

        // Subsequent traffic goes to the plain backend; the handshake bytes
        // stay untouched in front of it.
        let handshake_len = backend.written().len();
        assert!(matches!(socket.send(b"FEAT\r\n"), ReplyCode::WOULDBLOCK));
        assert_eq!(&backend.written()[handshake_len..], b"FEAT\r\n");
    }

    #[test]
    fn failed_proxy_handshake_closes_the_socket() {
        let backend = ScriptedBackend::unlimited();
        let (mut socket, connects) = proxied_socket(&backend);

        backend.push_inbound([0x05, 0xFF].to_vec());
        socket.on_socket_event(SocketEvent::Read);
        assert_eq!(connects.load(Ordering::Relaxed), 0);
        assert!(socket.is_closed());
    }

    #[test]
    fn direct_transport_connects_once() {
        let engine = EngineContext::new(EngineOptions::default());
        let mut socket = RealControlSocket::new(engine);
        socket.set_current_server(ServerInfo::new("h", 21));
        let connects = Arc::new(AtomicUsize::new(0));
        socket.set_handler(Box::new(CountingHandler {
            connects: Arc::clone(&connects),
        }));
        socket.install_transport(Transport::direct(Box::new(ScriptedBackend::unlimited())));
        assert_eq!(connects.load(Ordering::Relaxed), 1);
    }
}
