use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::frame::ProtocolFrame;
use crate::transport::{Session, default_handshake};

/// A single session callback, as observed by [`RecordingSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Line(String),
    CommunicationError,
    Exit,
    Disconnect,
}

/// A [`Session`] that records everything the transport tells it
///
/// Events are kept both as counters and on a channel so tests can block until
/// something happens on a reader thread.
pub struct RecordingSession {
    lines: Mutex<Vec<String>>,
    communication_errors: AtomicUsize,
    exits: AtomicUsize,
    disconnects: AtomicUsize,
    tx: Sender<SessionEvent>,
    rx: Receiver<SessionEvent>,
    handshake: Option<Vec<ProtocolFrame>>,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSession {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            lines: Mutex::new(Vec::new()),
            communication_errors: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            tx,
            rx,
            handshake: None,
        }
    }

    /// Replace the frames sent on every fresh connection
    pub fn with_handshake(mut self, frames: Vec<ProtocolFrame>) -> Self {
        self.handshake = Some(frames);
        self
    }

    /// Every line received so far, in order
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn communication_errors(&self) -> usize {
        self.communication_errors.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Wait for the next callback
    pub fn next_event(&self, timeout: Duration) -> Option<SessionEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Wait until a callback matching `predicate` arrives, skipping others
    pub fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&SessionEvent) -> bool,
    ) -> Option<SessionEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let event = self.rx.recv_deadline(deadline).ok()?;
            if predicate(&event) {
                return Some(event);
            }
        }
    }

    fn record(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Session for RecordingSession {
    fn process_response(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        self.record(SessionEvent::Line(line.to_string()));
    }

    fn fire_communication_error(&self) {
        self.communication_errors.fetch_add(1, Ordering::SeqCst);
        self.record(SessionEvent::CommunicationError);
    }

    fn fire_exit_event(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
        self.record(SessionEvent::Exit);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.record(SessionEvent::Disconnect);
    }

    fn handshake_frames(&self) -> Vec<ProtocolFrame> {
        self.handshake.clone().unwrap_or_else(default_handshake)
    }
}
