use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::io::{Dialer, InMemoryConnection};

/// What a single dial attempt of a [`ScriptedDialer`] does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    /// Nobody is listening yet
    Refuse,
    /// The dial fails with an error other than a refusal
    Fail(io::ErrorKind),
    /// A connection is made; the test receives the debuggee end
    Accept,
    /// A connection is made but the debuggee hangs up straight away
    Hangup,
}

/// A [`Dialer`] replaying a fixed script of outcomes
///
/// Once the script runs out every further attempt is refused. Clones share
/// the script and the attempt counter, so a test can keep one clone after
/// handing the other to a transport.
#[derive(Clone)]
pub struct ScriptedDialer {
    script: Arc<Mutex<VecDeque<DialOutcome>>>,
    attempts: Arc<AtomicUsize>,
    peers_tx: Sender<InMemoryConnection>,
    peers_rx: Receiver<InMemoryConnection>,
}

impl ScriptedDialer {
    pub fn new(script: impl IntoIterator<Item = DialOutcome>) -> Self {
        let (peers_tx, peers_rx) = crossbeam_channel::unbounded();
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            attempts: Arc::new(AtomicUsize::new(0)),
            peers_tx,
            peers_rx,
        }
    }

    /// A dialer whose first `n` attempts succeed
    pub fn accepting(n: usize) -> Self {
        Self::new(std::iter::repeat_n(DialOutcome::Accept, n))
    }

    /// Number of dial attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the debuggee end of the next accepted connection
    pub fn next_peer(&self, timeout: Duration) -> Option<InMemoryConnection> {
        self.peers_rx.recv_timeout(timeout).ok()
    }
}

impl Dialer for ScriptedDialer {
    type Connection = InMemoryConnection;

    fn dial(&self) -> io::Result<Self::Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(DialOutcome::Refuse);

        match outcome {
            DialOutcome::Refuse => Err(io::ErrorKind::ConnectionRefused.into()),
            DialOutcome::Fail(kind) => Err(kind.into()),
            DialOutcome::Accept => {
                let (ide, debuggee) = InMemoryConnection::pair();
                self.peers_tx
                    .send(debuggee)
                    .map_err(|_| io::Error::other("scripted dialer dropped"))?;
                Ok(ide)
            }
            DialOutcome::Hangup => {
                let (ide, debuggee) = InMemoryConnection::pair();
                drop(debuggee);
                Ok(ide)
            }
        }
    }
}
