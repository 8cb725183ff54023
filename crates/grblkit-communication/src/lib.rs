//! # grblkit communication
//!
//! The transport and protocol stack of the driver: serial endpoint and
//! its dry-run twin, the reader and poller worker threads, the grbl
//! response grammars, the character-counting flow-control engine and the
//! [`GrblStreamer`] orchestrator that ties them together.

pub mod communication;
pub mod firmware;

pub use communication::{
    list_ports, ConnectionParams, Endpoint, SerialEndpoint, SerialPortInfo, SimulatedEndpoint,
};

pub use firmware::grbl::{
    classify, EventCallback, FlowState, FullStatus, GrblResponse, GrblStreamer, StreamerConfig,
    StreamingMode, RX_BUFFER_SIZE,
};
