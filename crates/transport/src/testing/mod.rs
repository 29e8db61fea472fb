//! Testing utilities for the transport layer.
//!
//! These helpers let the transports be driven without real sockets or timers:
//!
//! - [`ManualScheduler`] queues watchdog tasks until the test fires them
//! - [`RecordingSession`] records every session callback
//! - [`ScriptedDialer`] answers dial attempts from a script, handing the
//!   debuggee end of each accepted connection to the test
//! - [`FailingReader`] yields a few chunks and then a read error

mod dialer;
mod reader;
mod scheduler;
mod session;

pub use dialer::{DialOutcome, ScriptedDialer};
pub use reader::{FailingReader, ReaderDone};
pub use scheduler::ManualScheduler;
pub use session::{RecordingSession, SessionEvent};

/// Build the bytes of a single inbound line, terminator included
///
/// # Example
///
/// ```
/// use transport::testing::line;
///
/// assert_eq!(line(502, 1, "ok"), b"502\t1\tok\n");
/// ```
pub fn line(command: u32, sequence: i64, payload: &str) -> Vec<u8> {
    format!("{command}\t{sequence}\t{payload}\n").into_bytes()
}
