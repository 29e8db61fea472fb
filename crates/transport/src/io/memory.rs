//! In-memory connection implementation for testing

use std::io::{self, BufRead, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{Connection, ReadHalf};

/// In-memory connection for testing
///
/// This connection uses channels for bidirectional communication without
/// requiring actual network connections. Reads block until data arrives, the
/// peer goes away, or either end of this side is shut down, mirroring a
/// blocking socket. Dropping a connection shuts it down.
///
/// # Examples
///
/// ```
/// use std::io::{Read, Write};
/// use transport::io::{Connection, InMemoryConnection};
///
/// // Create a connected pair
/// let (ide, mut debuggee) = InMemoryConnection::pair();
///
/// debuggee.write_all(b"502\t1\tok\n")?;
/// let mut buf = [0u8; 9];
/// ide.reader()?.read_exact(&mut buf)?;
/// assert_eq!(&buf, b"502\t1\tok\n");
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct InMemoryConnection {
    local: Arc<Endpoint>,
    rx: Receiver<Vec<u8>>,
    peer_closed: Arc<AtomicBool>,
}

/// Read handle of an [`InMemoryConnection`]
///
/// Implements [`BufRead`] by reading from a channel and maintaining an
/// internal buffer.
pub struct InMemoryReader {
    buffer: Cursor<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    endpoint: Arc<Endpoint>,
}

struct Endpoint {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    // never sends; dropping it wakes every reader of this end
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    closed: Arc<AtomicBool>,
}

impl Endpoint {
    fn new(tx: Sender<Vec<u8>>, closed: Arc<AtomicBool>) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            closed,
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // dropping our sender is the peer's end of stream
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_shut_down(&self) -> bool {
        matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl InMemoryConnection {
    /// Create a connected pair of in-memory connections
    ///
    /// Returns `(ide, debuggee)`; data written to one can be read from the other.
    pub fn pair() -> (Self, Self) {
        let (ide_tx, debuggee_rx) = crossbeam_channel::unbounded();
        let (debuggee_tx, ide_rx) = crossbeam_channel::unbounded();
        let ide_closed = Arc::new(AtomicBool::new(false));
        let debuggee_closed = Arc::new(AtomicBool::new(false));

        let ide = Self {
            local: Arc::new(Endpoint::new(ide_tx, Arc::clone(&ide_closed))),
            rx: ide_rx,
            peer_closed: Arc::clone(&debuggee_closed),
        };
        let debuggee = Self {
            local: Arc::new(Endpoint::new(debuggee_tx, debuggee_closed)),
            rx: debuggee_rx,
            peer_closed: ide_closed,
        };
        (ide, debuggee)
    }

    /// Whether the other end has been shut down or dropped
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed.load(Ordering::SeqCst)
    }

    /// Whether this end has been shut down
    pub fn is_closed(&self) -> bool {
        self.local.closed.load(Ordering::SeqCst)
    }
}

impl Connection for InMemoryConnection {
    type Reader = InMemoryReader;

    fn reader(&self) -> io::Result<Self::Reader> {
        Ok(InMemoryReader {
            buffer: Cursor::new(Vec::new()),
            rx: self.rx.clone(),
            endpoint: Arc::clone(&self.local),
        })
    }

    fn shutdown(&self) -> io::Result<()> {
        self.local.shutdown();
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.local.shutdown();
    }
}

impl Write for InMemoryConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self.local.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection shut down"))?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // No-op for channels (always immediately flushed)
        Ok(())
    }
}

impl ReadHalf for InMemoryReader {
    fn shutdown(&self) -> io::Result<()> {
        self.endpoint.shutdown();
        Ok(())
    }
}

impl BufRead for InMemoryReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        // If current buffer is exhausted, wait for more data
        if self.buffer.position() >= self.buffer.get_ref().len() as u64 {
            if self.endpoint.is_shut_down() {
                return Ok(&[]);
            }
            let shutdown_rx = &self.endpoint.shutdown_rx;
            let received = crossbeam_channel::select! {
                recv(self.rx) -> data => data.ok(),
                recv(shutdown_rx) -> _ => None,
            };
            match received {
                Some(data) => self.buffer = Cursor::new(data),
                // Channel closed or shut down, return EOF
                None => return Ok(&[]),
            }
        }

        self.buffer.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume(amt)
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let len = std::cmp::min(available.len(), buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.consume(len);
        Ok(len)
    }
}
