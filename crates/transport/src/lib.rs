//! Debugger transport
//!
//! This crate contains the client-side networking layer that connects a
//! debugger front-end to a debuggee process: the background line reader, the
//! transport contract shared by all network transports, and the client-mode
//! transport that redials when its connection is taken by a sibling process
//! listening on the same port, and a server-mode transport for debuggees that
//! dial in.
//!
//! Only frame boundaries are handled here. An inbound frame is one
//! newline-terminated line of text which is handed to the [`Session`]
//! unparsed.
pub mod bindings;
mod client;
mod config;
mod error;
pub mod frame;
pub mod io;
pub mod reader;
pub mod scheduler;
mod server;
pub mod testing;
mod transport;

pub use client::ClientModeTransport;
pub use config::ConnectionConfig;
pub use error::TransportError;
pub use frame::{Direction, Frame, ProtocolFrame};
pub use io::{Connection, Dialer, InMemoryConnection, TcpConnection, TcpDialer};
pub use reader::{LineBuffer, LineReader, ReaderEvents, ReaderHandle, SleepingPolicy};
pub use scheduler::{Scheduler, WatchdogScheduler};
pub use server::ServerModeTransport;
pub use transport::{DebuggerTransport, Session, TransportState, default_handshake};

/// The default port the debuggee listens on
pub const DEFAULT_DEBUG_PORT: u16 = 5678;
