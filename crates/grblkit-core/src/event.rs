//! Typed events delivered to the embedding application
//!
//! Every asynchronous signal the driver produces is one variant of
//! [`StreamerEvent`]. The embedder registers a single callback which is
//! invoked serially from the dispatcher thread; callbacks never overlap.
//! [`StreamerEvent::name`] returns the traditional `on_*` label for
//! embedders that prefer one uniform string-named channel.

use crate::state::{HashOffsets, MachineMode, Position, SettingsMap, VarsMap};
use serde::{Deserialize, Serialize};

/// One asynchronous event from the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamerEvent {
    /// The firmware booted (power-up or soft-reset)
    Boot,
    /// The serial session ended
    Disconnected,
    /// Informal log message for consoles and UIs
    Log(String),
    /// An inbound line that produced no state update
    Read(String),
    /// Data written to the wire
    Write(String),
    /// Machine mode or position changed
    StateUpdate {
        /// Current machine mode
        mode: MachineMode,
        /// Machine position
        machine_pos: Position,
        /// Working position
        work_pos: Position,
    },
    /// The `$#` offset table was fully received
    HashStateUpdate(HashOffsets),
    /// The `$G` modal parser state was received
    GcodeParserStateUpdate(Vec<String>),
    /// The `$$` settings download completed
    SettingsDownloaded(SettingsMap),
    /// Reported feed rate changed between two status reports
    FeedChange(f64),
    /// The machine started moving again after a standstill
    Movement,
    /// The machine position has stopped changing
    Standstill,
    /// A queued line went out on the wire
    LineSent {
        /// 1-based line number within the job
        index: usize,
        /// The transmitted text, newline excluded
        line: String,
    },
    /// The firmware acknowledged a line with `ok`
    ProcessedCommand {
        /// 1-based line number within the job
        index: usize,
        /// The acknowledged text
        line: String,
    },
    /// Job completion in percent, non-decreasing within one job
    ProgressPercent(u8),
    /// Receive-buffer fill in percent
    RxBufferPercent(u8),
    /// The stream queue length changed
    BufsizeChange(usize),
    /// The set of `#n` variables detected in the queued G-Code changed
    VarsChange(VarsMap),
    /// The queue drained and every line was acknowledged
    JobCompleted,
    /// The firmware raised an alarm
    Alarm {
        /// Alarm code, numeric on grbl 1.1, text on 0.9
        code: String,
        /// Human-readable description
        message: String,
    },
    /// The firmware rejected a line with `error:`
    Error {
        /// Job line number of the offending line, if attributable
        index: Option<usize>,
        /// The offending line text
        line: String,
        /// Error code, numeric on grbl 1.1, text on 0.9
        code: String,
        /// Human-readable description
        message: String,
    },
    /// A probe cycle reported its contact point
    Probe(Vec<f64>),
}

impl StreamerEvent {
    /// The traditional `on_*` event label
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boot => "on_boot",
            Self::Disconnected => "on_disconnected",
            Self::Log(_) => "on_log",
            Self::Read(_) => "on_read",
            Self::Write(_) => "on_write",
            Self::StateUpdate { .. } => "on_stateupdate",
            Self::HashStateUpdate(_) => "on_hash_stateupdate",
            Self::GcodeParserStateUpdate(_) => "on_gcode_parser_stateupdate",
            Self::SettingsDownloaded(_) => "on_settings_downloaded",
            Self::FeedChange(_) => "on_feed_change",
            Self::Movement => "on_movement",
            Self::Standstill => "on_standstill",
            Self::LineSent { .. } => "on_line_sent",
            Self::ProcessedCommand { .. } => "on_processed_command",
            Self::ProgressPercent(_) => "on_progress_percent",
            Self::RxBufferPercent(_) => "on_rx_buffer_percent",
            Self::BufsizeChange(_) => "on_bufsize_change",
            Self::VarsChange(_) => "on_vars_change",
            Self::JobCompleted => "on_job_completed",
            Self::Alarm { .. } => "on_alarm",
            Self::Error { .. } => "on_error",
            Self::Probe(_) => "on_probe",
        }
    }
}
