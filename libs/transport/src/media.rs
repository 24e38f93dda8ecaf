//! Media abstraction: the byte pipes channels run over.
//!
//! Raw OS socket plumbing lives outside this crate; the conductor only needs
//! non-blocking reads and writes with standard io conventions:
//! `ErrorKind::WouldBlock` means "nothing right now", `Ok(0)` from a read
//! means the peer closed the connection.

use std::fmt::Debug;
use std::io;

use crate::address::RemoteAddress;

/// One established bidirectional byte pipe.
pub trait Media: Send + Debug {
    /// Non-blocking read. `Ok(0)` signals end of stream.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Non-blocking write of as many bytes as currently fit.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Initiates close; the peer's reads observe end of stream.
    fn shutdown(&mut self);
}

/// Outbound connection establishment, invoked from conductor context.
pub trait Connector: Send {
    fn connect(&mut self, address: &RemoteAddress) -> io::Result<Box<dyn Media>>;
}

/// Inbound connection acceptance, invoked from conductor context.
pub trait MediaListener: Send {
    /// Non-blocking accept of one pending connection, if any.
    fn try_accept(&mut self) -> io::Result<Option<(RemoteAddress, Box<dyn Media>)>>;
}
