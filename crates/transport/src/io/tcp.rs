//! TCP-based connection implementation

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{Connection, Dialer, ReadHalf};

/// TCP connection to a debuggee
///
/// Read handles are clones of the underlying socket configured with a read
/// timeout, so a reader periodically wakes up to check for stop requests even
/// if [`shutdown`](Connection::shutdown) could not be delivered.
///
/// # Examples
///
/// ```no_run
/// use std::net::TcpStream;
/// use std::time::Duration;
/// use transport::io::TcpConnection;
///
/// let stream = TcpStream::connect("127.0.0.1:5678")?;
/// let connection = TcpConnection::new(stream, Duration::from_secs(1))?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Wrap an established stream
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be configured
    pub fn new(stream: TcpStream, read_timeout: Duration) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        Ok(Self { stream })
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Connection for TcpConnection {
    type Reader = TcpStream;

    fn reader(&self) -> io::Result<Self::Reader> {
        self.stream.try_clone()
    }

    fn shutdown(&self) -> io::Result<()> {
        shutdown_both(&self.stream)
    }
}

impl ReadHalf for TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        shutdown_both(self)
    }
}

fn shutdown_both(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        // already torn down by the peer
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

/// Dials a fixed host and port
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    read_timeout: Duration,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            read_timeout: Duration::from_secs(1),
        }
    }

    /// Set the read timeout applied to every dialled connection
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Dialer for TcpDialer {
    type Connection = TcpConnection;

    fn dial(&self) -> io::Result<Self::Connection> {
        let mut last_error = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    tracing::debug!(%addr, "connection made");
                    return TcpConnection::new(stream, self.read_timeout);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "error making connection");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} did not resolve to any address", self.addr),
            )
        }))
    }
}
