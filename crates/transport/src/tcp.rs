//! TCP socket backend, connector and readiness monitor.
//!
//! Connecting and readiness detection run on their own threads; everything
//! they learn is posted to the owning control socket's event queue, keeping
//! the control logic single-threaded.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use rustix::event::{poll, PollFd, PollFlags, Timespec};
use tracing::{debug, trace, warn};
use xfer_core::{Event, EventQueue, SocketEvent};

use crate::backend::SocketBackend;

/// A nonblocking TCP stream behind the [`SocketBackend`] seam.
pub struct TcpBackend {
    stream: TcpStream,
}

impl TcpBackend {
    /// Wraps a connected stream, switching it to nonblocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self { stream })
    }

    /// Clones the underlying stream for the readiness monitor.
    pub fn monitor_stream(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }
}

impl SocketBackend for TcpBackend {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.stream.write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

/// Handle of a background connect attempt.
///
/// The thread is detached; it finishes on its own and joining it would
/// block the control thread mid-teardown.
pub struct SpawnedConnector {
    slot: Arc<Mutex<Option<TcpStream>>>,
    _thread: JoinHandle<()>,
}

impl SpawnedConnector {
    /// Takes the connected stream after a successful `Connection` event.
    #[must_use]
    pub fn take_stream(&self) -> Option<TcpStream> {
        self.slot.lock().expect("connector slot poisoned").take()
    }
}

/// Resolves `host:port` and attempts each address in order, posting
/// `HostAddress`, `ConnectionNext` and finally `Connection` events.
///
/// `host` must already be IDN-converted.
#[must_use]
pub fn spawn_connector(host: String, port: u16, queue: Arc<EventQueue>) -> SpawnedConnector {
    let slot = Arc::new(Mutex::new(None));
    let thread = {
        let slot = Arc::clone(&slot);
        std::thread::spawn(move || {
            let addrs = match (host.as_str(), port).to_socket_addrs() {
                Ok(addrs) => addrs.collect::<Vec<_>>(),
                Err(error) => {
                    queue.post(Event::Socket(SocketEvent::Connection {
                        error: Some(error),
                    }));
                    return;
                }
            };
            let last = addrs.len().saturating_sub(1);
            for (index, addr) in addrs.into_iter().enumerate() {
                queue.post(Event::HostAddress(addr.ip().to_string()));
                match TcpStream::connect(addr) {
                    Ok(stream) => {
                        debug!(%addr, "connected");
                        *slot.lock().expect("connector slot poisoned") = Some(stream);
                        queue.post(Event::Socket(SocketEvent::Connection { error: None }));
                        return;
                    }
                    Err(error) if index < last => {
                        queue.post(Event::Socket(SocketEvent::ConnectionNext {
                            error: Some(error),
                        }));
                    }
                    Err(error) => {
                        queue.post(Event::Socket(SocketEvent::Connection {
                            error: Some(error),
                        }));
                    }
                }
            }
        })
    };
    SpawnedConnector {
        slot,
        _thread: thread,
    }
}

struct MonitorState {
    want_read: bool,
    want_write: bool,
    quit: bool,
}

/// Turns socket readiness into `Read`/`Write`/`Close` events.
///
/// Interest is one-shot: after posting a `Read` the monitor stays quiet for
/// that direction until [`request_read`](Self::request_read) re-arms it, so
/// an undrained socket cannot flood the queue.
pub struct SocketMonitor {
    state: Arc<(Mutex<MonitorState>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl SocketMonitor {
    /// Spawns the monitor on a clone of the connected stream.
    #[must_use]
    pub fn spawn(stream: TcpStream, queue: Arc<EventQueue>) -> Self {
        let state = Arc::new((
            Mutex::new(MonitorState {
                want_read: true,
                want_write: false,
                quit: false,
            }),
            Condvar::new(),
        ));
        let thread = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || monitor_loop(&stream, &queue, &state))
        };
        Self {
            state,
            thread: Some(thread),
        }
    }

    /// Re-arms read interest after the socket was drained.
    pub fn request_read(&self) {
        let (lock, cond) = &*self.state;
        lock.lock().expect("monitor state poisoned").want_read = true;
        cond.notify_one();
    }

    /// Arms write interest while spilled bytes are pending.
    pub fn request_write(&self) {
        let (lock, cond) = &*self.state;
        lock.lock().expect("monitor state poisoned").want_write = true;
        cond.notify_one();
    }

    /// Stops and joins the monitor thread.
    pub fn shutdown(&mut self) {
        {
            let (lock, cond) = &*self.state;
            lock.lock().expect("monitor state poisoned").quit = true;
            cond.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("socket monitor panicked");
            }
        }
    }
}

impl Drop for SocketMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor_loop(
    stream: &TcpStream,
    queue: &EventQueue,
    state: &(Mutex<MonitorState>, Condvar),
) {
    let (lock, cond) = state;
    loop {
        let (read, write) = {
            let mut guard = lock.lock().expect("monitor state poisoned");
            loop {
                if guard.quit {
                    return;
                }
                if guard.want_read || guard.want_write {
                    break (guard.want_read, guard.want_write);
                }
                guard = cond.wait(guard).expect("monitor state poisoned");
            }
        };

        let mut flags = PollFlags::empty();
        if read {
            flags |= PollFlags::IN;
        }
        if write {
            flags |= PollFlags::OUT;
        }
        let mut fds = [PollFd::new(stream, flags)];
        let timeout = Timespec {
            tv_sec: 0,
            tv_nsec: 200_000_000,
        };
        match poll(&mut fds, Some(&timeout)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(errno) if errno == rustix::io::Errno::INTR => continue,
            Err(errno) => {
                queue.post(Event::Socket(SocketEvent::Close {
                    error: Some(errno.into()),
                }));
                return;
            }
        }
        let revents = fds[0].revents();
        if revents.intersects(PollFlags::HUP | PollFlags::ERR) {
            trace!("socket hangup");
            queue.post(Event::Socket(SocketEvent::Close { error: None }));
            return;
        }
        let mut guard = lock.lock().expect("monitor state poisoned");
        if revents.contains(PollFlags::IN) && guard.want_read {
            guard.want_read = false;
            queue.post(Event::Socket(SocketEvent::Read));
        }
        if revents.contains(PollFlags::OUT) && guard.want_write {
            guard.want_write = false;
            queue.post(Event::Socket(SocketEvent::Write));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn connector_delivers_stream_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let queue = Arc::new(EventQueue::new());

        let connector = spawn_connector(addr.ip().to_string(), addr.port(), Arc::clone(&queue));

        let mut saw_connection = false;
        for _ in 0..10 {
            match queue.wait_next(Duration::from_secs(5)) {
                Some(Event::HostAddress(_)) => {}
                Some(Event::Socket(SocketEvent::Connection { error: None })) => {
                    saw_connection = true;
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_connection);
        assert!(connector.take_stream().is_some());
        // The stream is handed out exactly once.
        assert!(connector.take_stream().is_none());
    }

    #[test]
    fn connector_reports_failure() {
        let queue = Arc::new(EventQueue::new());
        // Port 1 on localhost is almost certainly closed; a refused
        // connection still exercises the failure path.
        let connector = spawn_connector("127.0.0.1".to_owned(), 1, Arc::clone(&queue));
        let mut failed = false;
        for _ in 0..10 {
            match queue.wait_next(Duration::from_secs(10)) {
                Some(Event::Socket(SocketEvent::Connection { error: Some(_) })) => {
                    failed = true;
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
        assert!(failed);
        assert!(connector.take_stream().is_none());
    }

    #[test]
    fn monitor_posts_read_once_until_rearmed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let queue = Arc::new(EventQueue::new());
        let monitor = SocketMonitor::spawn(client.try_clone().unwrap(), Arc::clone(&queue));

        server.write_all(b"ping").unwrap();
        assert!(matches!(
            queue.wait_next(Duration::from_secs(5)),
            Some(Event::Socket(SocketEvent::Read))
        ));
        // Without re-arming, no further read events even though the socket
        // stays readable.
        assert!(queue.wait_next(Duration::from_millis(400)).is_none());

        monitor.request_read();
        assert!(matches!(
            queue.wait_next(Duration::from_secs(5)),
            Some(Event::Socket(SocketEvent::Read))
        ));
        drop(monitor);
        drop(client);
    }
}
