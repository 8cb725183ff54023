//! Error handling for grblkit
//!
//! Three error families map the failure surface of the driver:
//! - Transport errors (port open, read/write, EOF) are fatal to a session.
//! - Protocol errors (unclassifiable firmware output) are recoverable.
//! - Stream errors (flow-control misuse) are recoverable except for a
//!   buffer-overflow attempt, which indicates a host-side bug.
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport-level error
///
/// Anything that goes wrong on the serial link itself. These end the
/// session; the embedder receives a `Disconnected` event.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The device node could not be opened
    #[error("Failed to open {port}: {reason}")]
    FailedToOpen {
        /// Device node, e.g. `/dev/ttyACM0`
        port: String,
        /// Underlying reason reported by the OS
        reason: String,
    },

    /// A read from the port failed
    #[error("Serial read failed: {reason}")]
    ReadFailed {
        /// Underlying reason
        reason: String,
    },

    /// A write to the port failed
    #[error("Serial write failed: {reason}")]
    WriteFailed {
        /// Underlying reason
        reason: String,
    },

    /// The device went away mid-session (EOF on the reader)
    #[error("Device disconnected")]
    Disconnected,

    /// Port enumeration failed
    #[error("Failed to enumerate ports: {reason}")]
    Enumeration {
        /// Underlying reason
        reason: String,
    },
}

/// Protocol-level error
///
/// An inbound line that fits no known grammar. Never fatal: the line is
/// surfaced to the embedder as a `Read` event and parsing continues.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// The line matched none of the known response grammars
    #[error("Unclassifiable response line: {line}")]
    UnknownLine {
        /// The offending line
        line: String,
    },

    /// A recognized report could not be fully parsed
    #[error("Malformed {report} report: {line}")]
    Malformed {
        /// Report kind (status, setting, hash, parser state)
        report: &'static str,
        /// The offending line
        line: String,
    },
}

/// Flow-control and lifecycle errors
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// No serial endpoint is attached
    #[error("Not connected")]
    NotConnected,

    /// A session is already running on this instance
    #[error("Already connected")]
    AlreadyConnected,

    /// A line can never fit the firmware receive buffer
    #[error("Line of {length} bytes cannot fit receive buffer of {capacity}")]
    LineTooLong {
        /// Payload length plus the newline terminator
        length: usize,
        /// Receive buffer capacity in bytes
        capacity: usize,
    },

    /// The command was refused in the current machine mode
    #[error("Refused in {mode} mode: {line}")]
    RefusedInMode {
        /// Machine mode at the time of the call
        mode: String,
        /// The refused line
        line: String,
    },

    /// Host-side accounting would have overflowed the receive buffer.
    /// This must not happen; the session is aborted when it does.
    #[error("Receive buffer overflow attempt: {fill} + {cost} > {capacity}")]
    BufferOverflowAttempt {
        /// Unacknowledged bytes at the time of the attempt
        fill: usize,
        /// Byte cost of the line about to be sent
        cost: usize,
        /// Receive buffer capacity in bytes
        capacity: usize,
    },
}

/// Main error type for grblkit
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Streaming error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// True if this error ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Stream(StreamError::BufferOverflowAttempt { .. })
                | Error::Io(_)
        )
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
