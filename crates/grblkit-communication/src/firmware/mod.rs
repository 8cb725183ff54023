//! Firmware protocol implementations
//!
//! Only grbl (0.9 and 1.x) is supported; the module boundary keeps the
//! wire grammars and the streaming engine apart from the transport.

pub mod grbl;
