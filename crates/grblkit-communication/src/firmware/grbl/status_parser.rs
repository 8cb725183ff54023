//! grbl status report parsing
//!
//! Two wire grammars exist. grbl 0.9 separates fields with commas:
//!
//! ```text
//! <Idle,MPos:0.000,3.000,0.000,WPos:0.000,3.000,0.000,Bf:15,Ln:4,F:500.0>
//! ```
//!
//! grbl 1.1 separates fields with pipes and may report only one
//! coordinate space plus a `WCO:` offset:
//!
//! ```text
//! <Idle|MPos:0.000,0.000,0.000|Bf:15,128|FS:500.0,8000|WCO:0.000,0.000,0.000>
//! ```
//!
//! When only one of MPos/WPos is present the other is derived via
//! `WPos = MPos - WCO`. Numeric parsing is locale-independent.

use grblkit_core::Position;
use serde::{Deserialize, Serialize};

/// Complete parsed status report
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FullStatus {
    /// Machine state token, e.g. `Idle`, `Run`, `Hold:0`
    pub mode: String,
    /// Position relative to the machine origin
    pub machine_pos: Option<Position>,
    /// Position in the active work coordinate system
    pub work_pos: Option<Position>,
    /// Work coordinate offset (grbl 1.1 `WCO:`)
    pub work_offset: Option<Position>,
    /// Current feed rate (`F:` or first half of `FS:`)
    pub feed_rate: Option<f64>,
    /// Planner buffer blocks available (`Bf:` / 0.9 `Buf:`)
    pub planner_blocks: Option<u32>,
    /// Receive buffer bytes available (`Bf:` second value / 0.9 `RX:`)
    pub rx_bytes: Option<u32>,
    /// Currently executing line number (`Ln:`)
    pub line_number: Option<u32>,
}

/// Parse a `<...>` status report. Returns `None` on anything malformed.
pub fn parse(line: &str) -> Option<FullStatus> {
    let line = line.trim();
    if !line.starts_with('<') || !line.ends_with('>') || line.len() < 3 {
        return None;
    }
    let inner = &line[1..line.len() - 1];

    let mut status = if inner.contains('|') {
        parse_v11(inner)?
    } else {
        parse_v09(inner)?
    };

    if status.mode.is_empty() || !status.mode.chars().next()?.is_ascii_alphabetic() {
        return None;
    }

    // Derive the missing coordinate space when possible
    if status.work_pos.is_none() {
        if let (Some(mpos), Some(wco)) = (status.machine_pos, status.work_offset) {
            status.work_pos = Some(Position::new(
                mpos.x - wco.x,
                mpos.y - wco.y,
                mpos.z - wco.z,
            ));
        }
    }
    if status.machine_pos.is_none() {
        if let (Some(wpos), Some(wco)) = (status.work_pos, status.work_offset) {
            status.machine_pos = Some(Position::new(
                wpos.x + wco.x,
                wpos.y + wco.y,
                wpos.z + wco.z,
            ));
        }
    }

    Some(status)
}

fn parse_v11(inner: &str) -> Option<FullStatus> {
    let mut fields = inner.split('|');
    let mut status = FullStatus {
        mode: fields.next()?.trim().to_string(),
        ..Default::default()
    };

    for field in fields {
        let field = field.trim();
        if let Some(rest) = field.strip_prefix("MPos:") {
            status.machine_pos = parse_position(rest);
        } else if let Some(rest) = field.strip_prefix("WPos:") {
            status.work_pos = parse_position(rest);
        } else if let Some(rest) = field.strip_prefix("WCO:") {
            status.work_offset = parse_position(rest);
        } else if let Some(rest) = field.strip_prefix("Bf:") {
            let mut parts = rest.split(',');
            status.planner_blocks = parts.next().and_then(|s| s.trim().parse().ok());
            status.rx_bytes = parts.next().and_then(|s| s.trim().parse().ok());
        } else if let Some(rest) = field.strip_prefix("FS:") {
            status.feed_rate = rest.split(',').next().and_then(|s| s.trim().parse().ok());
        } else if let Some(rest) = field.strip_prefix("F:") {
            status.feed_rate = rest.trim().parse().ok();
        } else if let Some(rest) = field.strip_prefix("Ln:") {
            status.line_number = rest.trim().parse().ok();
        }
        // Ov:, A:, Pn: and friends are irrelevant to streaming
    }

    Some(status)
}

fn parse_v09(inner: &str) -> Option<FullStatus> {
    let mode_end = inner.find(',').unwrap_or(inner.len());
    let mut status = FullStatus {
        mode: inner[..mode_end].trim().to_string(),
        ..Default::default()
    };

    status.machine_pos = field_after(inner, "MPos:").and_then(parse_position);
    status.work_pos = field_after(inner, "WPos:").and_then(parse_position);
    status.feed_rate = scalar_after(inner, "F:");
    status.planner_blocks = scalar_after(inner, "Buf:");
    status.rx_bytes = scalar_after(inner, "RX:");
    status.line_number = scalar_after(inner, "Ln:");

    Some(status)
}

// Everything after `prefix`; position parsing stops on its own once it
// has consumed three numeric fields.
fn field_after<'a>(inner: &'a str, prefix: &str) -> Option<&'a str> {
    let start = inner.find(prefix)? + prefix.len();
    Some(&inner[start..])
}

fn scalar_after<T: std::str::FromStr>(inner: &str, prefix: &str) -> Option<T> {
    let rest = field_after(inner, prefix)?;
    let end = rest.find([',', '|']).unwrap_or(rest.len());
    rest[..end].trim().parse().ok()
}

fn parse_position(rest: &str) -> Option<Position> {
    let mut coords = rest.split(',').map(|s| s.trim().parse::<f64>());
    let x = coords.next()?.ok()?;
    let y = coords.next()?.ok()?;
    let z = coords.next()?.ok()?;
    Some(Position::new(x, y, z))
}
