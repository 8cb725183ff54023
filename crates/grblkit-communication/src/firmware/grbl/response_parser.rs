//! grbl response classification
//!
//! Every inbound line maps to exactly one [`GrblResponse`]. The rules
//! are applied in a fixed order; anything malformed falls through to
//! `Unknown` so a garbled line can never stop the reader.

use crate::firmware::grbl::status_parser::{self, FullStatus};
use serde::{Deserialize, Serialize};

/// Coordinate-system offset names reported by `$#`, in report order.
/// `PRB` is always the final line of a hash dump.
pub const HASH_PREFIXES: [&str; 11] = [
    "G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92", "TLO", "PRB",
];

/// One classified firmware response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// `ok` acknowledgment
    Ok,
    /// `error:` rejection; the code is numeric on grbl 1.1, text on 0.9
    Error {
        /// Code suffix after `error:`
        code: String,
    },
    /// `ALARM:` notification
    Alarm {
        /// Code suffix after `ALARM:`
        code: String,
    },
    /// Boot banner, e.g. `Grbl 0.9j ['$' for help]`
    Boot {
        /// Version token, e.g. `0.9j`
        version: String,
    },
    /// `<...>` status report
    Status(FullStatus),
    /// `$n=value (comment)` settings line
    Setting {
        /// Setting number
        number: u32,
        /// Raw value string
        value: String,
        /// Parenthesized comment, empty when absent (grbl 1.1)
        comment: String,
    },
    /// `[G54:...]`-style coordinate offset line from `$#`
    HashEntry {
        /// Offset name, one of [`HASH_PREFIXES`]
        prefix: String,
        /// Offset values
        values: Vec<f64>,
    },
    /// `[G0 G54 ...]` modal parser state from `$G`
    ParserState {
        /// The 12 modal tokens with their word letters stripped
        modes: Vec<String>,
    },
    /// Anything else
    Unknown {
        /// The unclassified line
        line: String,
    },
}

/// Classify one inbound line.
pub fn classify(line: &str) -> GrblResponse {
    let line = line.trim();

    if line == "ok" {
        return GrblResponse::Ok;
    }

    if let Some(code) = line.strip_prefix("error:") {
        return GrblResponse::Error {
            code: code.trim().to_string(),
        };
    }

    if let Some(code) = line.strip_prefix("ALARM:") {
        return GrblResponse::Alarm {
            code: code.trim().to_string(),
        };
    }

    if line.starts_with("Grbl ") {
        let version = line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        return GrblResponse::Boot { version };
    }

    if line.starts_with('<') && line.ends_with('>') {
        if let Some(status) = status_parser::parse(line) {
            return GrblResponse::Status(status);
        }
        return unknown(line);
    }

    if line.starts_with('$') && line.contains('=') {
        if let Some(resp) = parse_setting(line) {
            return resp;
        }
        return unknown(line);
    }

    if line.starts_with('[') && line.ends_with(']') {
        let inner = &line[1..line.len() - 1];
        if let Some(resp) = parse_hash_entry(inner) {
            return resp;
        }
        if let Some(resp) = parse_parser_state(inner) {
            return resp;
        }
    }

    unknown(line)
}

fn unknown(line: &str) -> GrblResponse {
    GrblResponse::Unknown {
        line: line.to_string(),
    }
}

// `$130=200.000 (x max travel, mm)` on 0.9, `$130=200.000` on 1.1
fn parse_setting(line: &str) -> Option<GrblResponse> {
    let (number, rest) = line[1..].split_once('=')?;
    let number = number.trim().parse::<u32>().ok()?;

    let (value, comment) = match rest.find(" (") {
        Some(idx) if rest.ends_with(')') => {
            (rest[..idx].trim(), rest[idx + 2..rest.len() - 1].trim())
        }
        _ => (rest.trim(), ""),
    };

    Some(GrblResponse::Setting {
        number,
        value: value.to_string(),
        comment: comment.to_string(),
    })
}

// `G54:0.000,0.000,0.000`, `TLO:0.000`, `PRB:0.000,0.000,1.492:1`
fn parse_hash_entry(inner: &str) -> Option<GrblResponse> {
    let (prefix, payload) = inner.split_once(':')?;
    if !HASH_PREFIXES.contains(&prefix) {
        return None;
    }

    // PRB carries a trailing `:success` flag that is not a coordinate
    let values_part = payload.split(':').next().unwrap_or(payload);
    let mut values = Vec::new();
    for field in values_part.split(',') {
        values.push(field.trim().parse::<f64>().ok()?);
    }

    Some(GrblResponse::HashEntry {
        prefix: prefix.to_string(),
        values,
    })
}

// `G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F500. S0.`
fn parse_parser_state(inner: &str) -> Option<GrblResponse> {
    let tokens: Vec<&str> = inner.split_whitespace().collect();
    if tokens.len() != 12 {
        return None;
    }

    let mut modes = Vec::with_capacity(12);
    for token in tokens {
        let mut chars = token.chars();
        let letter = chars.next()?;
        if !"GMTFSP".contains(letter) {
            return None;
        }
        modes.push(chars.as_str().to_string());
    }

    Some(GrblResponse::ParserState { modes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_acknowledgements() {
        assert_eq!(classify("ok"), GrblResponse::Ok);
        assert_eq!(
            classify("error:22"),
            GrblResponse::Error { code: "22".into() }
        );
        assert_eq!(
            classify("error: Bad number format"),
            GrblResponse::Error {
                code: "Bad number format".into()
            }
        );
        assert_eq!(classify("ALARM:1"), GrblResponse::Alarm { code: "1".into() });
    }

    #[test]
    fn classifies_boot_banner() {
        assert_eq!(
            classify("Grbl 0.9j ['$' for help]"),
            GrblResponse::Boot {
                version: "0.9j".into()
            }
        );
        assert_eq!(
            classify("Grbl 1.1f ['$' for help]"),
            GrblResponse::Boot {
                version: "1.1f".into()
            }
        );
    }

    #[test]
    fn classifies_settings_with_and_without_comment() {
        assert_eq!(
            classify("$130=200.000 (x max travel, mm)"),
            GrblResponse::Setting {
                number: 130,
                value: "200.000".into(),
                comment: "x max travel, mm".into(),
            }
        );
        assert_eq!(
            classify("$32=0"),
            GrblResponse::Setting {
                number: 32,
                value: "0".into(),
                comment: "".into(),
            }
        );
    }

    #[test]
    fn classifies_hash_entries() {
        assert_eq!(
            classify("[G54:-10.000,0.500,3.000]"),
            GrblResponse::HashEntry {
                prefix: "G54".into(),
                values: vec![-10.0, 0.5, 3.0],
            }
        );
        assert_eq!(
            classify("[TLO:0.000]"),
            GrblResponse::HashEntry {
                prefix: "TLO".into(),
                values: vec![0.0],
            }
        );
        // the probe success flag is not a coordinate
        assert_eq!(
            classify("[PRB:0.000,0.000,1.492:1]"),
            GrblResponse::HashEntry {
                prefix: "PRB".into(),
                values: vec![0.0, 0.0, 1.492],
            }
        );
    }

    #[test]
    fn classifies_parser_state() {
        let resp = classify("[G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F500. S0.]");
        let GrblResponse::ParserState { modes } = resp else {
            panic!("expected parser state");
        };
        assert_eq!(modes.len(), 12);
        assert_eq!(modes[0], "0");
        assert_eq!(modes[1], "54");
        assert_eq!(modes[10], "500.");
    }

    #[test]
    fn malformed_lines_are_unknown() {
        assert!(matches!(classify("<Idle"), GrblResponse::Unknown { .. }));
        assert!(matches!(
            classify("[MSG:Caution: Unlocked]"),
            GrblResponse::Unknown { .. }
        ));
        assert!(matches!(
            classify("[G54:abc,def]"),
            GrblResponse::Unknown { .. }
        ));
        assert!(matches!(classify("$N0=G20"), GrblResponse::Unknown { .. }));
        assert!(matches!(classify("junk"), GrblResponse::Unknown { .. }));
    }
}
