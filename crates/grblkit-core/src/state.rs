//! Mirrored firmware state
//!
//! The driver maintains a host-side copy of everything the firmware
//! reports: machine mode, positions, EEPROM settings, the modal parser
//! state and the coordinate-system offset table. The mirror is updated
//! only from parsed inbound events; embedders read it via snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// EEPROM settings keyed by `$n` number
pub type SettingsMap = BTreeMap<u32, Setting>;

/// Coordinate-system offsets keyed by name (`G54`..`G59`, `G28`, `G30`,
/// `G92`, `TLO`, `PRB`)
pub type HashOffsets = BTreeMap<String, Vec<f64>>;

/// `#n` G-Code variables and their substitution values
pub type VarsMap = BTreeMap<String, Option<String>>;

/// Machine operating mode as reported in status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineMode {
    /// Waiting for commands
    #[default]
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Commands queued but motion not started (grbl 0.9)
    Queue,
    /// Alarm lock; motion refused until cleared
    Alarm,
    /// Check mode: commands parsed but not executed
    Check,
    /// Homing cycle in progress
    Home,
}

impl MachineMode {
    /// Map a status-report state token to a mode.
    ///
    /// grbl 1.1 appends sub-state suffixes (`Hold:0`), so matching is by
    /// prefix. Tokens outside the supported set are mapped conservatively
    /// and logged.
    pub fn from_report(token: &str) -> Self {
        match token {
            t if t.starts_with("Idle") => MachineMode::Idle,
            t if t.starts_with("Run") => MachineMode::Run,
            t if t.starts_with("Hold") => MachineMode::Hold,
            t if t.starts_with("Queue") => MachineMode::Queue,
            t if t.starts_with("Alarm") => MachineMode::Alarm,
            t if t.starts_with("Check") => MachineMode::Check,
            t if t.starts_with("Home") => MachineMode::Home,
            t if t.starts_with("Jog") => MachineMode::Run,
            t if t.starts_with("Door") => MachineMode::Hold,
            t if t.starts_with("Sleep") => MachineMode::Idle,
            unknown => {
                tracing::warn!("Unknown machine state '{}', defaulting to Idle", unknown);
                MachineMode::Idle
            }
        }
    }

    /// True while the machine is executing motion
    pub fn is_moving(&self) -> bool {
        matches!(self, MachineMode::Run | MachineMode::Home)
    }
}

impl fmt::Display for MachineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Run => write!(f, "Run"),
            Self::Hold => write!(f, "Hold"),
            Self::Queue => write!(f, "Queue"),
            Self::Alarm => write!(f, "Alarm"),
            Self::Check => write!(f, "Check"),
            Self::Home => write!(f, "Home"),
        }
    }
}

/// A 3-axis position in machine or working coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Position {
    /// Create a position from coordinates
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3},{:.3},{:.3}", self.x, self.y, self.z)
    }
}

/// One EEPROM setting as reported by `$$`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Setting {
    /// Raw value string
    pub value: String,
    /// Descriptive comment, empty on firmware that omits it
    pub comment: String,
}

impl Setting {
    /// Create a setting from value and comment
    pub fn new(value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comment: comment.into(),
        }
    }
}

/// Last-known firmware state.
///
/// Created at connect, reset when a boot line is observed, dropped at
/// disconnect. Snapshots are returned by copy; the single writer is the
/// event dispatcher thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    /// Current machine mode
    pub mode: MachineMode,
    /// Position relative to the machine origin
    pub machine_position: Position,
    /// Position in the active work coordinate system
    pub working_position: Position,
    /// Feed rate from the most recent status report, units/min
    pub feed_rate: f64,
    /// EEPROM settings downloaded via `$$`
    pub settings: SettingsMap,
    /// The 12 modal parser tokens reported by `$G`
    pub parser_modes: Vec<String>,
    /// Coordinate-system offsets reported by `$#`
    pub hash_offsets: HashOffsets,
    /// Receive-buffer fill derived from the in-flight log, 0..100
    pub rx_fill_percent: u8,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            mode: MachineMode::Idle,
            machine_position: Position::default(),
            working_position: Position::default(),
            feed_rate: 0.0,
            settings: SettingsMap::new(),
            parser_modes: default_parser_modes(),
            hash_offsets: default_hash_offsets(),
            rx_fill_percent: 0,
        }
    }
}

impl MachineState {
    /// Reset to the state grbl itself has right after boot
    pub fn reset(&mut self) {
        *self = MachineState::default();
    }
}

// Defaults mimic a freshly booted grbl so embedders have a consistent
// picture before the first download completes.

fn default_parser_modes() -> Vec<String> {
    ["0", "54", "17", "21", "90", "94", "0", "5", "9", "0", "0", "0"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_hash_offsets() -> HashOffsets {
    let mut map = HashOffsets::new();
    for name in ["G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92", "PRB"] {
        map.insert(name.to_string(), vec![0.0, 0.0, 0.0]);
    }
    map.insert("TLO".to_string(), vec![0.0]);
    map
}
