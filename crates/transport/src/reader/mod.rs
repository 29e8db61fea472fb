//! Background line reader
//!
//! A [`LineReader`] owns the read handle of exactly one connection. It blocks
//! on the socket, reassembles newline-terminated lines with a [`LineBuffer`]
//! and hands each complete line to its [`ReaderEvents`] in arrival order.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::io::{ReadHalf, is_idle};

mod line_buffer;

pub use line_buffer::LineBuffer;

/// Size of a single read from the socket
const CHUNK_SIZE: usize = 8 * 1024;

/// Callbacks from a running [`LineReader`]
///
/// The owner decides what a failure means; the reader only reports it. All
/// callbacks run on the reader thread, one at a time.
pub trait ReaderEvents: Send + 'static {
    /// A complete line, terminator included
    fn on_line(&mut self, line: &str);

    /// Reading failed; called at most once, before [`on_exit`](ReaderEvents::on_exit)
    fn on_communication_error(&mut self, error: &io::Error);

    /// The reader has finished and its stream is closed; always called exactly once
    fn on_exit(&mut self);
}

/// How long the reader idles between reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepingPolicy {
    /// Never sleep, rely on the blocking read alone
    Blocking,
    /// Sleep for `idle` whenever a read produced no data
    Simple { idle: Duration },
}

impl Default for SleepingPolicy {
    fn default() -> Self {
        SleepingPolicy::Simple {
            idle: Duration::from_millis(10),
        }
    }
}

impl SleepingPolicy {
    pub fn time_to_sleep(&self, was_active: bool) -> Duration {
        match self {
            SleepingPolicy::Simple { idle } if !was_active => *idle,
            _ => Duration::ZERO,
        }
    }
}

/// Reads lines from one connection until end of stream, error, or stop
pub struct LineReader<R, E> {
    input: R,
    events: E,
    buffer: LineBuffer,
    policy: SleepingPolicy,
    stopped: Arc<AtomicBool>,
}

impl<R, E> LineReader<R, E>
where
    R: ReadHalf,
    E: ReaderEvents,
{
    pub fn new(input: R, events: E) -> Self {
        Self {
            input,
            events,
            buffer: LineBuffer::new(),
            policy: SleepingPolicy::default(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sleeping_policy(mut self, policy: SleepingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the read loop on the current thread
    ///
    /// Returns once the stream ends, fails, or a stop was requested. The
    /// stream is closed and [`ReaderEvents::on_exit`] is called in every case.
    pub fn run(mut self) {
        if let Err(e) = self.read_loop() {
            tracing::debug!(error = %e, "reader communication error");
            self.events.on_communication_error(&e);
        }

        if let Err(e) = self.input.shutdown() {
            tracing::debug!(error = %e, "closing reader stream");
        }
        if !self.buffer.is_empty() {
            tracing::trace!(
                pending = self.buffer.pending().len(),
                "discarding unterminated line"
            );
        }
        self.events.on_exit();
    }

    /// Run the read loop on a new named thread
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned
    pub fn spawn(self, name: impl Into<String>) -> io::Result<ReaderHandle> {
        let stopped = Arc::clone(&self.stopped);
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || self.run())?;
        Ok(ReaderHandle {
            stopped,
            thread: Some(thread),
        })
    }

    fn read_loop(&mut self) -> io::Result<()> {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        while !self.is_stopped() {
            match self.input.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!("end of stream");
                    return Ok(());
                }
                Ok(n) => {
                    self.deliver(&chunk[..n]);
                    sleep(self.policy.time_to_sleep(true));
                }
                Err(e) if is_idle(&e) => sleep(self.policy.time_to_sleep(false)),
                // the stream was closed under us by a stop request
                Err(_) if self.is_stopped() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        tracing::debug!("reader stopped");
        Ok(())
    }

    fn deliver(&mut self, chunk: &[u8]) {
        for line in self.buffer.push(chunk) {
            if self.is_stopped() {
                return;
            }
            self.events.on_line(&line);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Control handle for a spawned [`LineReader`]
///
/// Stopping is cooperative: the reader notices the request at its next loop
/// iteration. Whoever owns the connection shuts it down to unblock a pending
/// read.
#[derive(Debug)]
pub struct ReaderHandle {
    stopped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Ask the reader to stop; idempotent
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait for the reader thread to finish
    ///
    /// Must not be called from the reader's own callbacks.
    pub fn join(mut self) -> thread::Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}
