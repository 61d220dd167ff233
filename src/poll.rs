//! The event-loop registration surface and the non-blocking socket.
//!
//! The engine never owns a poll implementation; it is handed one as an
//! interface and registers read/write/error interest on it. Likewise the
//! socket is an abstract non-blocking stream where short reads and writes
//! are legal. Both are traits so tests can drive the engine with scripted
//! fakes.

use std::io;

/// Identity of a connection within the poll surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// Readiness-registration surface of the enclosing event loop.
///
/// `insert_*`/`remove_*` are idempotent: inserting an already-registered
/// interest or removing an absent one is a no-op.
pub trait PollSurface {
    fn open(&mut self, token: Token);
    fn close(&mut self, token: Token);

    fn insert_read(&mut self, token: Token);
    fn insert_write(&mut self, token: Token);
    fn insert_error(&mut self, token: Token);

    fn remove_read(&mut self, token: Token);
    fn remove_write(&mut self, token: Token);
    fn remove_error(&mut self, token: Token);
}

/// A non-blocking byte stream.
///
/// `read_stream` and `write_stream` return the number of bytes actually
/// moved, which may be less than requested. A return of `Ok(0)` means no
/// more progress can be made right now; the caller yields and waits for the
/// next readiness notification. Connection failure is an `Err`.
pub trait Stream {
    fn read_stream(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_stream(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Stream for std::net::TcpStream {
    fn read_stream(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_stream(&mut self, buf: &[u8]) -> io::Result<usize> {
        match io::Write::write(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}
