//! grbl protocol support
//!
//! Response classification, status report parsing, error decoding, the
//! character-counting flow-control engine and the streamer front end.

pub mod controller;
pub mod error_decoder;
pub mod response_parser;
pub mod status_parser;
pub mod streamer;

pub use controller::{EventCallback, GrblStreamer, StreamerConfig};
pub use response_parser::{classify, GrblResponse};
pub use status_parser::FullStatus;
pub use streamer::{FlowState, StreamingMode};

/// grbl's serial receive buffer capacity in bytes
pub const RX_BUFFER_SIZE: usize = 128;

/// Maximum payload bytes per data line; the newline terminator occupies
/// the remaining buffer byte
pub const MAX_LINE_LENGTH: usize = RX_BUFFER_SIZE - 1;

/// Real-time status query (`?`)
pub const RT_STATUS_QUERY: u8 = b'?';
/// Real-time feed hold (`!`)
pub const RT_FEED_HOLD: u8 = b'!';
/// Real-time cycle start / resume (`~`)
pub const RT_CYCLE_START: u8 = b'~';
/// Real-time soft reset (Ctrl-X)
pub const RT_SOFT_RESET: u8 = 0x18;
