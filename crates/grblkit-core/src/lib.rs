//! # grblkit core
//!
//! Core types shared by the grblkit crates: the error taxonomy, the
//! typed event stream delivered to the embedding application, and the
//! mirrored firmware state model.

pub mod error;
pub mod event;
pub mod state;

pub use error::{Error, ProtocolError, Result, StreamError, TransportError};
pub use event::StreamerEvent;
pub use state::{
    HashOffsets, MachineMode, MachineState, Position, Setting, SettingsMap, VarsMap,
};
