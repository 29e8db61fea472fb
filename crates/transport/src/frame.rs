//! Outbound frame encoding and frame logging
//!
//! The transport never looks inside a frame. Outbound frames only need to be
//! packed into bytes; inbound frames are single lines of text.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Command id of the request that starts the debuggee once the session is set up
pub const CMD_RUN: u32 = 101;

/// Command id of the version exchange sent at the start of every connection
pub const CMD_VERSION: u32 = 501;

/// A unit of the wire protocol that can be written to a connection
pub trait Frame: fmt::Display + Send + Sync {
    /// Encode the frame to the bytes written on the wire
    fn pack(&self) -> Bytes;
}

/// A tab separated protocol frame: `command`, `sequence`, `payload`
///
/// The payload is opaque to this crate and written verbatim, so it must not
/// contain a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub command: u32,
    pub sequence: i64,
    pub payload: String,
}

impl ProtocolFrame {
    pub fn new(command: u32, sequence: i64, payload: impl Into<String>) -> Self {
        Self {
            command,
            sequence,
            payload: payload.into(),
        }
    }
}

impl fmt::Display for ProtocolFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.command, self.sequence, self.payload)
    }
}

impl Frame for ProtocolFrame {
    fn pack(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

/// Which way a logged frame travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn marker(self) -> &'static str {
        match self {
            Direction::Inbound => ">>>",
            Direction::Outbound => "<<<",
        }
    }
}

/// Record a frame for diagnostics
///
/// Only formats anything when debug logging is enabled.
pub fn log_frame<F>(direction: Direction, frame: &F)
where
    F: fmt::Display + ?Sized,
{
    if tracing::enabled!(tracing::Level::DEBUG) {
        let now = chrono::Local::now().format("%H:%M:%S%.3f");
        tracing::debug!(
            "{now} {} {}",
            direction.marker(),
            frame.to_string().trim_end()
        );
    }
}
