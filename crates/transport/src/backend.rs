//! The byte-level seam between the transport and a socket.

use std::io;

/// Nonblocking byte sink/source the transport stacks on.
///
/// Implementations report a full outbound path with
/// [`io::ErrorKind::WouldBlock`]; the transport treats every other error as
/// fatal for the connection. `read` returning `Ok(0)` means the peer closed
/// the connection.
pub trait SocketBackend: Send {
    /// Writes as many bytes as the socket accepts.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Reads available bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
