use std::io;

use crate::error::TransportError;
use crate::frame::{self, CMD_RUN, CMD_VERSION, Direction, Frame, ProtocolFrame};
use crate::io::is_disconnect;

/// Lifecycle of a transport
///
/// `Init → Connected → Approved`, or `Disconnected` from any state. A
/// connection is only `Approved` once the peer has actually sent something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportState {
    Init = 0,
    Connected = 1,
    Approved = 2,
    Disconnected = 3,
}

impl TransportState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TransportState::Init,
            1 => TransportState::Connected,
            2 => TransportState::Approved,
            _ => TransportState::Disconnected,
        }
    }
}

/// The debugger session a transport reports to
///
/// Callbacks are invoked from the reader thread, the watchdog thread, or the
/// thread calling into the transport, never concurrently for the same
/// connection's lines.
pub trait Session: Send + Sync + 'static {
    /// One inbound line, terminator included
    fn process_response(&self, line: &str);

    /// The link to the debuggee failed for good
    fn fire_communication_error(&self);

    /// The reader finished; the connection is gone
    fn fire_exit_event(&self);

    /// Mark the session as no longer connected
    fn disconnect(&self);

    /// Frames sent on every freshly dialled connection before it is handed over
    fn handshake_frames(&self) -> Vec<ProtocolFrame> {
        default_handshake()
    }
}

/// Version exchange followed by the run request
pub fn default_handshake() -> Vec<ProtocolFrame> {
    vec![
        ProtocolFrame::new(CMD_VERSION, 1, "1.1\tUNIX\tID"),
        ProtocolFrame::new(CMD_RUN, 3, ""),
    ]
}

/// Contract shared by all network transports
///
/// Implementors supply the byte-level write in
/// [`send_message_impl`](DebuggerTransport::send_message_impl); the provided
/// [`send_frame`](DebuggerTransport::send_frame) adds frame logging and the
/// failure policy.
pub trait DebuggerTransport: Send + Sync {
    /// Block until a connection to the debuggee is established
    fn wait_for_connect(&self) -> Result<(), TransportError>;

    /// Whether the debuggee is known to be on the other end
    fn is_connected(&self) -> bool;

    /// Tear down the current connection and reader; idempotent
    ///
    /// A line the reader is already handing to the session when `close` runs
    /// may still be delivered. Nothing read after that is.
    fn close(&self);

    /// Stop any further reconnection without closing the socket
    fn disconnect(&self);

    /// Record that the link is gone after a fatal send failure
    fn mark_disconnected(&self);

    fn session(&self) -> &dyn Session;

    /// Write an encoded frame to the current connection
    ///
    /// Returns `Ok(false)` when there is no connection to write to.
    fn send_message_impl(&self, packed: &[u8]) -> io::Result<bool>;

    /// Encode and send a frame, returning whether it reached the socket
    fn send_frame(&self, frame: &dyn Frame) -> bool {
        frame::log_frame(Direction::Outbound, frame);
        let packed = frame.pack();
        match self.send_message_impl(&packed) {
            Ok(sent) => sent,
            Err(e) if is_disconnect(&e) => {
                tracing::warn!(error = %e, "peer went away while sending");
                self.mark_disconnected();
                self.session().disconnect();
                self.session().fire_communication_error();
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "sending frame");
                false
            }
        }
    }
}
