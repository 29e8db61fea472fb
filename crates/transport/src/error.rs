//! Error types for the transport layer.

use std::io;
use std::time::Duration;

use crate::transport::TransportState;

/// Errors surfaced to the caller of a transport operation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Every dial attempt in the retry budget failed.
    #[error("failed to connect to debugging script after {attempts} attempts")]
    ConnectFailed {
        /// Number of dial attempts made.
        attempts: u64,
        /// The error returned by the last attempt.
        #[source]
        source: io::Error,
    },

    /// The handshake could not be written to a fresh connection.
    #[error("could not send handshake to debugging script")]
    Handshake,

    /// The operation is not legal in the current transport state.
    #[error("operation not permitted in state {0:?}")]
    InvalidState(TransportState),

    /// No debuggee connected to the listening socket in time.
    #[error("no connection accepted within {0:?}")]
    AcceptTimeout(Duration),

    /// The transport was closed while the operation was in progress.
    #[error("transport closed")]
    Closed,

    /// An I/O error occurred on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

