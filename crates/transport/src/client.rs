//! Client-mode transport: the IDE dials a debuggee that is listening
//!
//! A debuggee and the children it forks may all listen on the same port, so a
//! single dial can be accepted by a process that never services it. A fresh
//! connection is therefore only trusted once the peer has sent something. If
//! nothing arrives within the approval timeout the connection is dropped and
//! the whole dial procedure runs again, without the session ever seeing the
//! abandoned connection.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use retry::OperationResult;

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::frame::{self, Direction, Frame};
use crate::io::{Connection, Dialer, TcpDialer};
use crate::reader::{LineReader, ReaderEvents, ReaderHandle};
use crate::scheduler::Scheduler;
use crate::transport::{DebuggerTransport, Session, TransportState};

/// Reconnecting transport for attaching to a listening debuggee
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use transport::testing::RecordingSession;
/// use transport::{
///     ClientModeTransport, ConnectionConfig, DebuggerTransport, Scheduler, WatchdogScheduler,
/// };
///
/// let scheduler: Arc<dyn Scheduler> = Arc::new(WatchdogScheduler::start()?);
/// let session = Arc::new(RecordingSession::new());
/// let transport = ClientModeTransport::tcp(
///     "127.0.0.1:5678",
///     session,
///     scheduler,
///     ConnectionConfig::default(),
/// );
/// transport.wait_for_connect()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ClientModeTransport<D, S>
where
    D: Dialer,
    S: Session,
{
    inner: Arc<Inner<D, S>>,
}

struct Inner<D, S>
where
    D: Dialer,
{
    dialer: D,
    session: Arc<S>,
    scheduler: Arc<dyn Scheduler>,
    config: ConnectionConfig,
    started: AtomicBool,
    state: AtomicU8,
    // last generation handed out; generations start at 1
    generations: AtomicU64,
    // generation of the installed link, 0 when there is none
    current: AtomicU64,
    // generation that reached `Approved`, 0 when none did
    approved: AtomicU64,
    link: Mutex<Option<Link<D::Connection>>>,
}

/// The live connection together with the reader bound to it
struct Link<C> {
    connection: C,
    reader: ReaderHandle,
    generation: u64,
}

enum AttemptError {
    Dial(io::Error),
    Handshake(io::Error),
    Closed,
}

impl<S> ClientModeTransport<TcpDialer, S>
where
    S: Session,
{
    /// Transport dialling `addr` over TCP
    pub fn tcp(
        addr: impl Into<String>,
        session: Arc<S>,
        scheduler: Arc<dyn Scheduler>,
        config: ConnectionConfig,
    ) -> Self {
        let dialer = TcpDialer::new(addr).with_read_timeout(config.read_timeout);
        Self::new(dialer, session, scheduler, config)
    }
}

impl<D, S> ClientModeTransport<D, S>
where
    D: Dialer,
    S: Session,
{
    pub fn new(
        dialer: D,
        session: Arc<S>,
        scheduler: Arc<dyn Scheduler>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dialer,
                session,
                scheduler,
                config,
                started: AtomicBool::new(false),
                state: AtomicU8::new(TransportState::Init as u8),
                generations: AtomicU64::new(0),
                current: AtomicU64::new(0),
                approved: AtomicU64::new(0),
                link: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> TransportState {
        self.inner.state()
    }
}

impl<D, S> DebuggerTransport for ClientModeTransport<D, S>
where
    D: Dialer,
    S: Session,
{
    fn wait_for_connect(&self) -> Result<(), TransportError> {
        let state = self.inner.state();
        if state != TransportState::Init || self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::InvalidState(state));
        }

        // give the debuggee a moment to start listening
        if !self.inner.config.settle_delay.is_zero() {
            thread::sleep(self.inner.config.settle_delay);
        }
        self.inner.connect()
    }

    fn is_connected(&self) -> bool {
        self.inner.state() == TransportState::Approved
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

impl<D, S> Drop for ClientModeTransport<D, S>
where
    D: Dialer,
    S: Session,
{
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<D, S> Inner<D, S>
where
    D: Dialer,
    S: Session,
{
    fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link<D::Connection>>> {
        tracing::trace!("locking connection");
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the full dial procedure and arm the approval watchdog
    #[tracing::instrument(skip(self))]
    fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        {
            let mut link = self.lock_link();
            self.retire(&mut link);
        }

        let result = retry::retry(self.config.retry_delays(), || match self.attempt() {
            Ok(generation) => OperationResult::Ok(generation),
            Err(AttemptError::Dial(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!(error = %e, "debuggee not listening yet");
                OperationResult::Retry(AttemptError::Dial(e))
            }
            Err(AttemptError::Handshake(e)) => {
                tracing::debug!(error = %e, "handshake failed");
                OperationResult::Retry(AttemptError::Handshake(e))
            }
            Err(e) => OperationResult::Err(e),
        });

        match result {
            Ok(generation) => {
                tracing::debug!(generation, "connected, waiting for approval");
                self.arm_watchdog(generation);
                Ok(())
            }
            Err(retry::Error {
                error: AttemptError::Closed,
                ..
            }) => {
                tracing::debug!("transport closed while connecting");
                Err(TransportError::Closed)
            }
            Err(retry::Error {
                error: AttemptError::Dial(source) | AttemptError::Handshake(source),
                tries,
                ..
            }) => {
                tracing::warn!(attempts = tries, error = %source, "could not connect to debuggee");
                self.set_state(TransportState::Disconnected);
                Err(TransportError::ConnectFailed {
                    attempts: tries,
                    source,
                })
            }
        }
    }

    /// One dial attempt: dial, install the link, send the handshake
    fn attempt(self: &Arc<Self>) -> Result<u64, AttemptError> {
        let mut link = self.lock_link();
        if self.state() == TransportState::Disconnected {
            return Err(AttemptError::Closed);
        }

        let connection = self.dialer.dial().map_err(AttemptError::Dial)?;
        let generation = self
            .install(&mut link, connection)
            .map_err(AttemptError::Dial)?;

        let entered = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                match TransportState::from_u8(state) {
                    TransportState::Init | TransportState::Connected => {
                        Some(TransportState::Connected as u8)
                    }
                    _ => None,
                }
            });
        if entered.is_err() {
            // closed while dialling
            self.retire(&mut link);
            return Err(AttemptError::Closed);
        }

        if let Err(e) = self.handshake(&mut link) {
            tracing::debug!(generation, error = %e, "sending handshake");
            self.retire(&mut link);
            return Err(AttemptError::Handshake(e));
        }
        Ok(generation)
    }

    fn install(
        self: &Arc<Self>,
        slot: &mut Option<Link<D::Connection>>,
        connection: D::Connection,
    ) -> io::Result<u64> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let input = connection.reader()?;
        let events = ClientEvents {
            inner: Arc::downgrade(self),
            generation,
        };

        // current before the reader starts, so its first line is not discarded
        self.current.store(generation, Ordering::SeqCst);
        let spawned =
            LineReader::new(input, events).spawn(format!("debugger-reader-{generation}"));
        let reader = match spawned {
            Ok(reader) => reader,
            Err(e) => {
                self.current.store(0, Ordering::SeqCst);
                if let Err(e) = connection.shutdown() {
                    tracing::debug!(error = %e, "closing connection");
                }
                return Err(e);
            }
        };

        *slot = Some(Link {
            connection,
            reader,
            generation,
        });
        tracing::debug!(generation, "installed connection");
        Ok(generation)
    }

    fn handshake(&self, slot: &mut Option<Link<D::Connection>>) -> io::Result<()> {
        let link = slot
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        for frame in self.session.handshake_frames() {
            frame::log_frame(Direction::Outbound, &frame);
            link.connection.write_all(&frame.pack())?;
        }
        link.connection.flush()
    }

    /// Stop and close the installed link, if any
    ///
    /// Callbacks still in flight from its reader are ignored from here on.
    fn retire(&self, slot: &mut Option<Link<D::Connection>>) {
        self.current.store(0, Ordering::SeqCst);
        if let Some(link) = slot.take() {
            link.reader.stop();
            if let Err(e) = link.connection.shutdown() {
                tracing::debug!(error = %e, "closing connection");
            }
            tracing::debug!(generation = link.generation, "closed connection");
        }
    }

    fn close(&self) {
        self.set_state(TransportState::Disconnected);
        let mut link = self.lock_link();
        self.retire(&mut link);
    }

    fn arm_watchdog(self: &Arc<Self>, generation: u64) {
        let inner = Arc::downgrade(self);
        self.scheduler.schedule(
            self.config.approval_timeout,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.on_watchdog(generation);
                }
            }),
        );
    }

    /// Redial if `generation` is still installed and still silent
    #[tracing::instrument(skip(self))]
    fn on_watchdog(self: &Arc<Self>, generation: u64) {
        {
            let mut link = self.lock_link();
            let state = self.state();
            if state != TransportState::Connected
                || self.current.load(Ordering::SeqCst) != generation
            {
                tracing::trace!(?state, "watchdog has nothing to do");
                return;
            }
            tracing::debug!("no traffic on connection, redialling");
            self.retire(&mut link);
        }

        match self.connect() {
            Ok(()) => {}
            Err(TransportError::Closed) => {}
            Err(e) => {
                tracing::warn!(error = %e, "redial failed");
                self.session.fire_communication_error();
            }
        }
    }

    fn on_line(&self, generation: u64, line: &str) {
        let is_approved = self.approved.load(Ordering::SeqCst) == generation
            && self.current.load(Ordering::SeqCst) == generation;
        if !is_approved {
            let _link = self.lock_link();
            if self.current.load(Ordering::SeqCst) != generation {
                tracing::trace!(generation, "discarding line from superseded connection");
                return;
            }
            if self
                .state
                .compare_exchange(
                    TransportState::Connected as u8,
                    TransportState::Approved as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.approved.store(generation, Ordering::SeqCst);
                tracing::debug!(generation, "connection approved");
            }
        }

        // close() or a redial may have retired this generation since the check
        if self.current.load(Ordering::SeqCst) != generation {
            tracing::trace!(generation, "discarding line from closed connection");
            return;
        }
        frame::log_frame(Direction::Inbound, line);
        self.session.process_response(line);
    }

    fn is_live_and_approved(&self, generation: u64) -> bool {
        self.current.load(Ordering::SeqCst) == generation
            && self.approved.load(Ordering::SeqCst) == generation
    }

    fn on_communication_error(&self, generation: u64, error: &io::Error) {
        if self.is_live_and_approved(generation) && self.state() == TransportState::Approved {
            tracing::warn!(generation, %error, "lost connection to debuggee");
            self.set_state(TransportState::Disconnected);
            self.session.disconnect();
            self.session.fire_communication_error();
        } else {
            tracing::debug!(generation, %error, "ignoring error on unapproved connection");
        }
    }

    fn on_exit(&self, generation: u64) {
        if self.is_live_and_approved(generation) {
            tracing::debug!(generation, "debuggee connection closed");
            self.set_state(TransportState::Disconnected);
            self.session.fire_exit_event();
        } else {
            tracing::trace!(generation, "reader of superseded connection exited");
        }
    }
}

impl<D, S> Drop for Inner<D, S>
where
    D: Dialer,
{
    fn drop(&mut self) {
        let link = self
            .link
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = link {
            link.reader.stop();
            if let Err(e) = link.connection.shutdown() {
                tracing::debug!(error = %e, "closing connection");
            }
        }
    }
}

/// Routes reader callbacks of one connection generation back to the transport
struct ClientEvents<D, S>
where
    D: Dialer,
{
    inner: Weak<Inner<D, S>>,
    generation: u64,
}

impl<D, S> ReaderEvents for ClientEvents<D, S>
where
    D: Dialer,
    S: Session,
{
    fn on_line(&mut self, line: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_line(self.generation, line);
        }
    }

    fn on_communication_error(&mut self, error: &io::Error) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_communication_error(self.generation, error);
        }
    }

    fn on_exit(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_exit(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::time::{Duration, Instant};

    use crossbeam_channel::Sender;

    use super::*;
    use crate::frame::{CMD_RUN, ProtocolFrame};
    use crate::io::InMemoryConnection;
    use crate::testing::{
        DialOutcome, FailingReader, ManualScheduler, ReaderDone, RecordingSession, ScriptedDialer,
        SessionEvent, line,
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    type TestTransport = ClientModeTransport<ScriptedDialer, RecordingSession>;

    struct Harness {
        transport: TestTransport,
        dialer: ScriptedDialer,
        session: Arc<RecordingSession>,
        scheduler: Arc<ManualScheduler>,
    }

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            retry_delay: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn harness(dialer: ScriptedDialer, config: ConnectionConfig) -> Harness {
        let session = Arc::new(RecordingSession::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let shared: Arc<dyn Scheduler> = scheduler.clone();
        let transport = ClientModeTransport::new(dialer.clone(), session.clone(), shared, config);
        Harness {
            transport,
            dialer,
            session,
            scheduler,
        }
    }

    fn read_handshake(peer: &InMemoryConnection) -> Vec<String> {
        let mut reader = peer.reader().unwrap();
        (0..2)
            .map(|_| {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                line
            })
            .collect()
    }

    fn wait_for_line(session: &RecordingSession) -> Option<SessionEvent> {
        session.wait_for(TIMEOUT, |event| matches!(event, SessionEvent::Line(_)))
    }

    /// Accepts every dial; each connection reads `chunks` and is then reset
    struct ResettingDialer {
        chunks: Vec<Vec<u8>>,
        dropped: Sender<()>,
    }

    struct ResettingConnection {
        chunks: Vec<Vec<u8>>,
        dropped: Sender<()>,
    }

    impl Dialer for ResettingDialer {
        type Connection = ResettingConnection;

        fn dial(&self) -> io::Result<Self::Connection> {
            Ok(ResettingConnection {
                chunks: self.chunks.clone(),
                dropped: self.dropped.clone(),
            })
        }
    }

    impl Write for ResettingConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for ResettingConnection {
        type Reader = FailingReader;

        fn reader(&self) -> io::Result<Self::Reader> {
            Ok(FailingReader::with_signal(
                self.chunks.clone(),
                io::ErrorKind::ConnectionReset,
                self.dropped.clone(),
            ))
        }

        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn resetting(
        chunks: Vec<Vec<u8>>,
    ) -> (
        ClientModeTransport<ResettingDialer, RecordingSession>,
        Arc<RecordingSession>,
        ReaderDone,
    ) {
        let (dropped, done) = FailingReader::signal();
        let session = Arc::new(RecordingSession::new());
        let scheduler: Arc<dyn Scheduler> = Arc::new(ManualScheduler::new());
        let transport = ClientModeTransport::new(
            ResettingDialer { chunks, dropped },
            session.clone(),
            scheduler,
            fast_config(),
        );
        (transport, session, done)
    }

    #[test]
    fn clean_attach() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();

        assert_eq!(h.transport.state(), TransportState::Connected);
        assert!(!h.transport.is_connected());
        assert_eq!(h.scheduler.delays(), vec![Duration::from_millis(1000)]);

        let mut peer = h.dialer.next_peer(TIMEOUT).unwrap();
        assert_eq!(
            read_handshake(&peer),
            vec!["501\t1\t1.1\tUNIX\tID\n", "101\t3\t\n"]
        );

        peer.write_all(&line(502, 1, "ok")).unwrap();
        assert_eq!(
            wait_for_line(&h.session),
            Some(SessionEvent::Line("502\t1\tok\n".to_string()))
        );
        assert_eq!(h.transport.state(), TransportState::Approved);
        assert!(h.transport.is_connected());
        assert_eq!(h.dialer.attempts(), 1);
    }

    #[test]
    fn silent_connection_is_replaced() {
        let h = harness(ScriptedDialer::accepting(2), fast_config());
        h.transport.wait_for_connect().unwrap();
        let stolen = h.dialer.next_peer(TIMEOUT).unwrap();

        // nothing arrives before the watchdog fires
        assert_eq!(h.scheduler.run_pending(), 1);
        assert!(stolen.is_peer_closed());
        assert_eq!(h.dialer.attempts(), 2);
        assert_eq!(h.transport.state(), TransportState::Connected);
        assert_eq!(h.scheduler.pending(), 1);
        drop(stolen);

        let mut real = h.dialer.next_peer(TIMEOUT).unwrap();
        real.write_all(&line(502, 1, "ok")).unwrap();
        assert_eq!(
            wait_for_line(&h.session),
            Some(SessionEvent::Line("502\t1\tok\n".to_string()))
        );
        assert!(h.transport.is_connected());

        // the abandoned connection never reached the session
        assert_eq!(h.session.lines(), vec!["502\t1\tok\n".to_string()]);
        assert_eq!(h.session.exits(), 0);
        assert_eq!(h.session.communication_errors(), 0);
    }

    #[test]
    fn watchdog_is_a_no_op_after_approval() {
        let h = harness(ScriptedDialer::accepting(2), fast_config());
        h.transport.wait_for_connect().unwrap();
        let mut peer = h.dialer.next_peer(TIMEOUT).unwrap();
        peer.write_all(&line(502, 1, "ok")).unwrap();
        wait_for_line(&h.session).unwrap();

        assert_eq!(h.scheduler.run_pending(), 1);
        assert_eq!(h.transport.state(), TransportState::Approved);
        assert_eq!(h.dialer.attempts(), 1);
        assert_eq!(h.scheduler.pending(), 0);
        assert!(!peer.is_peer_closed());
    }

    #[test]
    fn refused_dials_exhaust_the_budget() {
        let config = ConnectionConfig {
            settle_delay: Duration::ZERO,
            ..Default::default()
        };
        let h = harness(ScriptedDialer::new([]), config);

        let start = Instant::now();
        let err = h.transport.wait_for_connect().unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(
            err,
            TransportError::ConnectFailed { attempts: 10, .. }
        ));
        assert_eq!(h.dialer.attempts(), 10);
        assert!(elapsed >= Duration::from_millis(9 * 150), "{elapsed:?}");
        assert_eq!(h.transport.state(), TransportState::Disconnected);
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn refusals_then_success() {
        let h = harness(
            ScriptedDialer::new([
                DialOutcome::Refuse,
                DialOutcome::Refuse,
                DialOutcome::Accept,
            ]),
            fast_config(),
        );
        h.transport.wait_for_connect().unwrap();
        assert_eq!(h.dialer.attempts(), 3);
        assert_eq!(h.transport.state(), TransportState::Connected);
    }

    #[test]
    fn other_dial_errors_fail_at_once() {
        let h = harness(
            ScriptedDialer::new([DialOutcome::Fail(io::ErrorKind::PermissionDenied)]),
            fast_config(),
        );
        let err = h.transport.wait_for_connect().unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { attempts: 1, .. }));
        assert_eq!(h.dialer.attempts(), 1);
        assert_eq!(h.transport.state(), TransportState::Disconnected);
    }

    #[test]
    fn failed_handshake_is_retried() {
        let h = harness(
            ScriptedDialer::new([DialOutcome::Hangup, DialOutcome::Accept]),
            fast_config(),
        );
        h.transport.wait_for_connect().unwrap();
        assert_eq!(h.dialer.attempts(), 2);
        assert_eq!(h.transport.state(), TransportState::Connected);

        let peer = h.dialer.next_peer(TIMEOUT).unwrap();
        assert_eq!(read_handshake(&peer).len(), 2);
        assert_eq!(h.session.exits(), 0);
    }

    #[test]
    fn custom_handshake_frames() {
        let session = Arc::new(
            RecordingSession::new().with_handshake(vec![ProtocolFrame::new(CMD_RUN, 9, "go")]),
        );
        let dialer = ScriptedDialer::accepting(1);
        let scheduler: Arc<dyn Scheduler> = Arc::new(ManualScheduler::new());
        let transport = ClientModeTransport::new(dialer.clone(), session, scheduler, fast_config());
        transport.wait_for_connect().unwrap();

        let peer = dialer.next_peer(TIMEOUT).unwrap();
        let mut handshake = String::new();
        peer.reader().unwrap().read_line(&mut handshake).unwrap();
        assert_eq!(handshake, "101\t9\tgo\n");
    }

    #[test]
    fn wait_for_connect_only_from_init() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();
        assert!(matches!(
            h.transport.wait_for_connect(),
            Err(TransportError::InvalidState(TransportState::Connected))
        ));
        assert_eq!(h.dialer.attempts(), 1);
    }

    #[test]
    fn at_most_one_live_connection() {
        let h = harness(ScriptedDialer::accepting(3), fast_config());
        h.transport.wait_for_connect().unwrap();
        h.scheduler.run_pending();
        h.scheduler.run_pending();

        let peers: Vec<_> = std::iter::from_fn(|| h.dialer.next_peer(Duration::ZERO)).collect();
        assert_eq!(peers.len(), 3);
        let live = peers.iter().filter(|p| !p.is_peer_closed()).count();
        assert_eq!(live, 1);
        assert!(!peers[2].is_peer_closed());

        h.transport.close();
        assert!(peers.iter().all(InMemoryConnection::is_peer_closed));
    }

    #[test]
    fn peer_exit_after_approval() {
        let h = harness(ScriptedDialer::accepting(2), fast_config());
        h.transport.wait_for_connect().unwrap();
        let mut peer = h.dialer.next_peer(TIMEOUT).unwrap();
        peer.write_all(&line(502, 1, "ok")).unwrap();
        wait_for_line(&h.session).unwrap();

        drop(peer);
        assert_eq!(
            h.session
                .wait_for(TIMEOUT, |event| *event == SessionEvent::Exit),
            Some(SessionEvent::Exit)
        );
        assert!(!h.transport.is_connected());
        assert_eq!(h.transport.state(), TransportState::Disconnected);

        h.scheduler.run_pending();
        assert_eq!(h.dialer.attempts(), 1);
        assert_eq!(h.session.exits(), 1);
        assert_eq!(h.session.communication_errors(), 0);
    }

    #[test]
    fn read_error_after_approval_is_reported() {
        let (transport, session, done) = resetting(vec![line(502, 1, "ok")]);
        transport.wait_for_connect().unwrap();
        assert!(done.wait(TIMEOUT));

        assert_eq!(session.lines(), vec!["502\t1\tok\n".to_string()]);
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert_eq!(session.disconnects(), 1);
        assert_eq!(session.communication_errors(), 1);
        assert_eq!(session.exits(), 1);
    }

    #[test]
    fn read_error_before_approval_is_suppressed() {
        let (transport, session, done) = resetting(Vec::new());
        transport.wait_for_connect().unwrap();
        assert!(done.wait(TIMEOUT));

        // the watchdog, not the reader, decides what happens next
        assert_eq!(transport.state(), TransportState::Connected);
        assert!(session.lines().is_empty());
        assert_eq!(session.disconnects(), 0);
        assert_eq!(session.communication_errors(), 0);
        assert_eq!(session.exits(), 0);
        assert_eq!(session.next_event(Duration::ZERO), None);
    }

    #[test]
    fn nothing_is_delivered_after_close() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();
        let mut peer = h.dialer.next_peer(TIMEOUT).unwrap();
        peer.write_all(&line(502, 1, "ok")).unwrap();
        wait_for_line(&h.session).unwrap();

        h.transport.close();
        // a callback from the first generation racing with close
        h.transport.inner.on_line(1, "502\t2\tlate\n");
        h.transport
            .inner
            .on_communication_error(1, &io::ErrorKind::ConnectionReset.into());
        h.transport.inner.on_exit(1);

        assert_eq!(h.session.lines(), vec!["502\t1\tok\n".to_string()]);
        assert_eq!(h.session.communication_errors(), 0);
        assert_eq!(h.session.exits(), 0);
    }

    #[test]
    fn send_reaches_the_peer() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();
        let peer = h.dialer.next_peer(TIMEOUT).unwrap();
        read_handshake(&peer);

        assert!(h.transport.send_frame(&ProtocolFrame::new(CMD_RUN, 5, "")));
        let mut sent = String::new();
        peer.reader().unwrap().read_line(&mut sent).unwrap();
        assert_eq!(sent, "101\t5\t\n");
    }

    #[test]
    fn send_failure_is_fatal() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();
        let mut peer = h.dialer.next_peer(TIMEOUT).unwrap();
        peer.write_all(&line(502, 1, "ok")).unwrap();
        wait_for_line(&h.session).unwrap();

        drop(peer);
        h.session
            .wait_for(TIMEOUT, |event| *event == SessionEvent::Exit)
            .unwrap();

        assert!(!h.transport.send_frame(&ProtocolFrame::new(CMD_RUN, 5, "")));
        assert_eq!(h.session.communication_errors(), 1);
        assert_eq!(h.session.disconnects(), 1);
    }

    #[test]
    fn close_is_idempotent_and_stops_redials() {
        let h = harness(ScriptedDialer::accepting(2), fast_config());
        h.transport.wait_for_connect().unwrap();
        let peer = h.dialer.next_peer(TIMEOUT).unwrap();

        h.transport.close();
        h.transport.close();
        assert!(peer.is_peer_closed());
        assert_eq!(h.transport.state(), TransportState::Disconnected);
        assert!(!h.transport.send_frame(&ProtocolFrame::new(CMD_RUN, 5, "")));

        h.scheduler.run_pending();
        assert_eq!(h.dialer.attempts(), 1);
        assert_eq!(h.session.communication_errors(), 0);
        assert_eq!(h.session.exits(), 0);
    }

    #[test]
    fn disconnect_keeps_the_socket() {
        let h = harness(ScriptedDialer::accepting(2), fast_config());
        h.transport.wait_for_connect().unwrap();
        let peer = h.dialer.next_peer(TIMEOUT).unwrap();
        read_handshake(&peer);

        h.transport.disconnect();
        assert_eq!(h.transport.state(), TransportState::Disconnected);
        assert!(!peer.is_peer_closed());

        // no redial once disconnected
        h.scheduler.run_pending();
        assert_eq!(h.dialer.attempts(), 1);
        assert!(h.transport.send_frame(&ProtocolFrame::new(CMD_RUN, 5, "")));
    }

    #[test]
    fn failed_redial_is_reported() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();

        h.scheduler.run_pending();
        assert_eq!(h.dialer.attempts(), 11);
        assert_eq!(h.transport.state(), TransportState::Disconnected);
        assert_eq!(h.session.communication_errors(), 1);
        // only a successful dial re-arms the watchdog
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn dropping_the_transport_closes_the_connection() {
        let h = harness(ScriptedDialer::accepting(1), fast_config());
        h.transport.wait_for_connect().unwrap();
        let peer = h.dialer.next_peer(TIMEOUT).unwrap();

        drop(h.transport);
        assert!(peer.is_peer_closed());
        // the pending watchdog only holds a weak reference
        assert_eq!(h.scheduler.run_pending(), 1);
        assert_eq!(h.dialer.attempts(), 1);
    }
}
