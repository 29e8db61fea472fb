//! Connection abstractions for the debugger transports
//!
//! A transport owns exactly one [`Connection`] at a time. The write side stays
//! with the transport behind its socket guard, while an independent read
//! handle obtained from [`Connection::reader`] is moved into the background
//! [`LineReader`](crate::LineReader) thread.
//!
//! # Examples
//!
//! ## Dialling over TCP
//!
//! ```no_run
//! use transport::io::{Dialer, TcpDialer};
//!
//! let dialer = TcpDialer::new("127.0.0.1:5678");
//! let connection = dialer.dial()?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Using an in-memory connection for testing
//!
//! ```
//! use std::io::{Read, Write};
//! use transport::io::{Connection, InMemoryConnection};
//!
//! let (mut ide, debuggee) = InMemoryConnection::pair();
//! ide.write_all(b"501\t1\t1.1\n")?;
//!
//! let mut line = String::new();
//! debuggee.reader()?.take(10).read_to_string(&mut line)?;
//! assert_eq!(line, "501\t1\t1.1\n");
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io::{self, Read, Write};

mod memory;
mod tcp;


pub use memory::{InMemoryConnection, InMemoryReader};
pub use tcp::{TcpConnection, TcpDialer};

/// A live duplex byte stream to the debuggee
///
/// # Requirements
///
/// - Writing goes through the connection itself
/// - [`reader`](Connection::reader) returns an independent handle onto the
///   same stream that can be moved to a background thread
/// - [`shutdown`](Connection::shutdown) must unblock a read pending on any
///   handle returned by `reader`, which then observes end of stream
pub trait Connection: Write + Send + 'static {
    /// The read handle type
    type Reader: ReadHalf;

    /// Obtain a read handle for the background reader
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be created (e.g. socket cloning fails)
    fn reader(&self) -> io::Result<Self::Reader>;

    /// Shut down both directions of the stream
    fn shutdown(&self) -> io::Result<()>;
}

/// A read handle onto a [`Connection`]
pub trait ReadHalf: Read + Send + 'static {
    /// Shut down the stream this handle reads from, including its write side
    fn shutdown(&self) -> io::Result<()>;
}

/// Something that can open a fresh [`Connection`] to a fixed endpoint
pub trait Dialer: Send + Sync + 'static {
    /// The connection type produced by a successful dial
    type Connection: Connection;

    /// Make a single connection attempt
    ///
    /// A connection-refused error means the debuggee is not listening yet and
    /// the caller may try again.
    fn dial(&self) -> io::Result<Self::Connection>;
}

/// Whether an error means the peer is gone rather than a transient failure
pub(crate) fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Whether a read error only means no data arrived within the read timeout
pub(crate) fn is_idle(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
