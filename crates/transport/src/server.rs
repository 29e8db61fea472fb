//! Server-mode transport: the IDE listens and the debuggee dials in
//!
//! Only one process ever connects to a port the IDE owns, so there is no
//! approval step. The accepted connection is trusted straight away.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::frame::{self, Direction, Frame};
use crate::io::{Connection, TcpConnection, is_idle};
use crate::reader::{LineReader, ReaderEvents, ReaderHandle};
use crate::transport::{DebuggerTransport, Session, TransportState};

/// How often a pending accept checks for a connection or a close
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Transport that waits for the debuggee to connect to it
///
/// The state is `Init` until a connection is accepted, then `Connected`
/// until the connection ends or the transport is closed.
pub struct ServerModeTransport<S>
where
    S: Session,
{
    listener: TcpListener,
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    session: Arc<S>,
    config: ConnectionConfig,
    started: AtomicBool,
    closed: AtomicBool,
    state: AtomicU8,
    link: Mutex<Option<Link>>,
}

struct Link {
    connection: TcpConnection,
    reader: ReaderHandle,
}

impl<S> ServerModeTransport<S>
where
    S: Session,
{
    /// Start listening on `addr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound
    pub fn bind(
        addr: impl ToSocketAddrs,
        session: Arc<S>,
        config: ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::debug!(addr = ?listener.local_addr().ok(), "listening for debuggee");
        Ok(Self {
            listener,
            inner: Arc::new(Inner {
                session,
                config,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                state: AtomicU8::new(TransportState::Init as u8),
                link: Mutex::new(None),
            }),
        })
    }

    /// The bound address, useful after binding port 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> TransportState {
        self.inner.state()
    }

    fn accept(&self) -> Result<TcpConnection, TransportError> {
        let timeout = self.inner.config.accept_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "debuggee connected");
                    stream.set_nonblocking(false)?;
                    return Ok(TcpConnection::new(stream, self.inner.config.read_timeout)?);
                }
                Err(e) if is_idle(&e) => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::AcceptTimeout(timeout));
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<S> DebuggerTransport for ServerModeTransport<S>
where
    S: Session,
{
    #[tracing::instrument(skip(self))]
    fn wait_for_connect(&self) -> Result<(), TransportError> {
        let state = self.inner.state();
        if state != TransportState::Init || self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::InvalidState(state));
        }

        let result = self.accept().and_then(|connection| self.inner.install(connection));
        if result.is_err() {
            self.inner.set_state(TransportState::Disconnected);
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.inner.state() == TransportState::Connected
    }

    fn close(&self) {
        self.inner.close();
    }

    fn disconnect(&self) {
        tracing::debug!("transport disconnected");
        self.inner.set_state(TransportState::Disconnected);
    }

    fn mark_disconnected(&self) {
        self.inner.set_state(TransportState::Disconnected);
    }

    fn session(&self) -> &dyn Session {
        &*self.inner.session
    }

    fn send_message_impl(&self, packed: &[u8]) -> io::Result<bool> {
        let mut link = self.inner.lock_link();
        match link.as_mut() {
            Some(link) => {
                link.connection.write_all(packed)?;
                link.connection.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<S> Drop for ServerModeTransport<S>
where
    S: Session,
{
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<S> Inner<S>
where
    S: Session,
{
    fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        tracing::trace!("locking connection");
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install(self: &Arc<Self>, mut connection: TcpConnection) -> Result<(), TransportError> {
        let mut link = self.lock_link();
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        for frame in self.session.handshake_frames() {
            frame::log_frame(Direction::Outbound, &frame);
            if let Err(e) = connection.write_all(&frame.pack()) {
                tracing::warn!(error = %e, "sending handshake");
                return Err(TransportError::Handshake);
            }
        }

        let events = ServerEvents {
            inner: Arc::downgrade(self),
        };
        let reader = LineReader::new(connection.reader()?, events).spawn("debugger-reader")?;
        *link = Some(Link { connection, reader });
        self.set_state(TransportState::Connected);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(TransportState::Disconnected);
        if let Some(link) = self.lock_link().take() {
            link.reader.stop();
            if let Err(e) = link.connection.shutdown() {
                tracing::debug!(error = %e, "closing connection");
            }
            tracing::debug!("closed connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ServerEvents<S> {
    inner: Weak<Inner<S>>,
}

impl<S> ReaderEvents for ServerEvents<S>
where
    S: Session,
{
    fn on_line(&mut self, line: &str) {
        if let Some(inner) = self.inner.upgrade() {
            frame::log_frame(Direction::Inbound, line);
            inner.session.process_response(line);
        }
    }

    fn on_communication_error(&mut self, error: &io::Error) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.is_closed() {
            tracing::debug!(%error, "reader error after close");
            return;
        }
        tracing::warn!(%error, "lost connection to debuggee");
        inner.set_state(TransportState::Disconnected);
        inner.session.disconnect();
        inner.session.fire_communication_error();
    }

    fn on_exit(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.is_closed() {
            return;
        }
        tracing::debug!("debuggee connection closed");
        inner.set_state(TransportState::Disconnected);
        inner.session.fire_exit_event();
    }
}
