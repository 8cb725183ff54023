//! Transport layer
//!
//! One trait, two implementations: [`SerialEndpoint`] talks to real
//! hardware through the `serialport` crate, [`SimulatedEndpoint`]
//! implements the dry-run mode by synthesizing acknowledgements. The
//! line-reader and status-poller worker threads live here as well.

pub mod poller;
pub mod reader;
pub mod serial;
pub mod simulated;

pub use serial::{list_ports, SerialEndpoint, SerialPortInfo};
pub use simulated::SimulatedEndpoint;

use grblkit_core::{Result, StreamerEvent};

/// Line injected into the inbound stream to unblock and terminate the
/// reader thread. Never produced by real firmware (EOT bytes).
pub const SENTINEL_LINE: &str = "\u{4}\u{4}";

/// Parameters for opening a serial connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Device node, e.g. `/dev/ttyACM0` or `COM3`
    pub port: String,
    /// Baud rate; grbl ≥ 0.9i runs at 115200
    pub baud_rate: u32,
    /// Read timeout slice in milliseconds. Short, so a blocked reader
    /// notices the shutdown flag promptly.
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115200,
            timeout_ms: 100,
        }
    }
}

impl ConnectionParams {
    /// Create parameters for a port at the given baud rate
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Byte-level transport to one grbl device.
///
/// `read_line` blocks and is called only from the reader thread; writes
/// are serialized internally so the poller, the dispatcher and embedder
/// threads can share the writer. `unblock_reader` makes a blocked
/// `read_line` return [`SENTINEL_LINE`].
pub trait Endpoint: Send + Sync {
    /// Open the underlying device
    fn open(&self) -> Result<()>;

    /// Close the underlying device
    fn close(&self) -> Result<()>;

    /// Block until one complete line (newline stripped) is available
    fn read_line(&self) -> Result<String>;

    /// Write raw bytes. The caller has already respected flow control.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Make a blocked `read_line` return the shutdown sentinel
    fn unblock_reader(&self);

    /// Human-readable endpoint description for logs
    fn description(&self) -> String;
}

/// Internal traffic between the worker threads and the dispatcher.
pub(crate) enum Message {
    /// A complete inbound line from the reader thread
    Line(String),
    /// A deferred event to hand to the embedder callback
    Event(StreamerEvent),
    /// The reader observed EOF or a read error
    ConnectionLost,
    /// Orderly dispatcher shutdown
    Shutdown,
}
