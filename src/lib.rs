//! # grblkit
//!
//! A host-side streaming driver for the grbl CNC firmware:
//! - Full-duplex serial transport with dedicated reader and poller threads
//! - Two streaming disciplines: incremental and character-counting, the
//!   latter keeping grbl's 128-byte receive buffer as full as possible
//! - Complete response parsing: status reports (0.9 and 1.1 grammars),
//!   settings, coordinate offsets, parser state, alarms and errors
//! - A mirrored firmware state readable as a snapshot at any time
//! - Typed events delivered serially to a single embedder callback
//! - G-Code preprocessing: cleanup, `#n` variable substitution and
//!   dynamic feed override
//! - A simulated endpoint for dry runs and tests
//!
//! ## Architecture
//!
//! grblkit is organized as a workspace with multiple crates:
//!
//! 1. **grblkit-core** - error taxonomy, events, state model
//! 2. **grblkit-parser** - the G-Code preprocessor seam
//! 3. **grblkit-communication** - transport, protocol, streaming engine
//! 4. **grblkit** - this crate: re-exports and the demo binary
//!
//! ## Example
//!
//! ```no_run
//! use grblkit::{GrblStreamer, StreamerEvent};
//!
//! let mut grbl = GrblStreamer::new(|event: StreamerEvent| {
//!     println!("[{}] {:?}", event.name(), event);
//! });
//! grbl.connect("/dev/ttyACM0", 115200)?;
//! grbl.poll_start()?;
//! grbl.stream("G0 X10 Y10\nG1 X20 F500\n")?;
//! # Ok::<(), grblkit::Error>(())
//! ```

pub use grblkit_core::{
    Error, HashOffsets, MachineMode, MachineState, Position, ProtocolError, Result, Setting,
    SettingsMap, StreamError, StreamerEvent, TransportError, VarsMap,
};

pub use grblkit_parser::{GcodePreprocessor, PreprocessError, Preprocessor};

pub use grblkit_communication::{
    classify, list_ports, ConnectionParams, Endpoint, EventCallback, FlowState, FullStatus,
    GrblResponse, GrblStreamer, SerialEndpoint, SerialPortInfo, SimulatedEndpoint, StreamerConfig,
    StreamingMode, RX_BUFFER_SIZE,
};

/// Initialize tracing output for binaries embedding the driver.
///
/// Respects `RUST_LOG`; defaults to `info`.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    Ok(())
}
