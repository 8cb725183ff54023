//! G-Code line preprocessing
//!
//! Ported behavior of the driver's preprocessing stage:
//! - comment removal (parenthesized and `;`/`%` to end of line)
//! - removal of words grbl cannot execute but is safe to drop silently
//!   (tool changes, variable assignments)
//! - whitespace compression for reduced serial bandwidth
//! - `#n` variable discovery and substitution
//! - dynamic feed override
//!
//! The streamer talks to this stage only through the [`Preprocessor`]
//! trait, so embedders can substitute their own pipeline.

use grblkit_core::VarsMap;
use thiserror::Error;

/// Preprocessing failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    /// A `#n` variable is referenced but has no substitution value.
    /// This is an operator error; the stream must not continue.
    #[error("Undefined variable #{name}")]
    UndefinedVariable {
        /// The variable key, e.g. `1` for `#1`
        name: String,
    },
}

/// The preprocessing seam consumed by the flow controller.
///
/// `tidy` runs once when a line enters the queue; `process` runs when a
/// line is about to be transmitted and may expand it into zero or more
/// wire lines.
pub trait Preprocessor: Send {
    /// Clean up one raw line: strip comments, unsupported words and
    /// whitespace. The result may be empty.
    fn tidy(&self, line: &str) -> String;

    /// Record all `#n` variables referenced by the line
    fn find_vars(&mut self, line: &str);

    /// The variables discovered so far and their substitution values
    fn vars(&self) -> &VarsMap;

    /// Define the substitution value for one variable
    fn set_var(&mut self, name: &str, value: &str);

    /// Transform one queued line into the lines that actually go out on
    /// the wire (variable substitution, feed override).
    fn process(&mut self, line: &str) -> Result<Vec<String>, PreprocessError>;

    /// Enable or disable dynamic feed override
    fn set_feed_override(&mut self, enabled: bool);

    /// Set the feed rate applied while feed override is enabled, units/min
    fn request_feed(&mut self, feed: f64);

    /// Forget session state. Called when the firmware boots: grbl's feed
    /// is unset after boot, so the next override must re-emit an F word.
    fn reset(&mut self);

    /// Forget per-job state (the variable table)
    fn job_reset(&mut self);
}

/// Default preprocessor implementation
pub struct GcodePreprocessor {
    vars: VarsMap,
    do_feed_override: bool,
    requested_feed: Option<f64>,
    feed_last: Option<f64>,
}

impl GcodePreprocessor {
    /// Create a preprocessor with feed override disabled
    pub fn new() -> Self {
        Self {
            vars: VarsMap::new(),
            do_feed_override: false,
            requested_feed: None,
            feed_last: None,
        }
    }

    /// The feed rate last seen or written by this preprocessor
    pub fn feed_last(&self) -> Option<f64> {
        self.feed_last
    }

    fn strip_comments(line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut depth = 0usize;
        for ch in line.chars() {
            match ch {
                '(' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                ';' | '%' if depth == 0 => break,
                c if depth == 0 => out.push(c),
                _ => {}
            }
        }
        out
    }

    // Words grbl cannot execute but that are safe to drop without
    // changing what the program does: tool changes and variable
    // assignments. Everything else unsupported is sent through so the
    // firmware can raise an error the operator sees.
    fn is_droppable(line: &str) -> bool {
        if line.contains('T') || line.contains("M6") {
            return true;
        }
        is_var_assignment(line)
    }

    fn substitute_vars(&self, line: &str) -> Result<String, PreprocessError> {
        if !line.contains('#') {
            return Ok(line.to_string());
        }

        let mut out = String::with_capacity(line.len());
        let mut chars = line.char_indices().peekable();
        while let Some((_, ch)) = chars.next() {
            if ch != '#' {
                out.push(ch);
                continue;
            }
            let mut key = String::new();
            while let Some((_, d)) = chars.peek() {
                if d.is_ascii_digit() {
                    key.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if key.is_empty() {
                out.push('#');
                continue;
            }
            match self.vars.get(&key) {
                Some(Some(value)) => {
                    tracing::info!("Substituted var #{} -> {}", key, value);
                    out.push_str(value);
                }
                _ => return Err(PreprocessError::UndefinedVariable { name: key }),
            }
        }
        Ok(out)
    }

    fn override_feed(&mut self, line: &str) -> String {
        let contained_feed = parse_feed(line);

        if !self.do_feed_override {
            if let Some(feed) = contained_feed {
                self.feed_last = Some(feed);
            }
            return line.to_string();
        }

        let Some(requested) = self.requested_feed else {
            return line.to_string();
        };

        let mut out = if contained_feed.is_some() {
            strip_feed(line)
        } else {
            line.to_string()
        };

        // Feed is modal; only write an F word when the effective feed
        // actually changes.
        if self.feed_last != Some(requested) {
            out.push_str(&format!("F{:.1}", requested));
            self.feed_last = Some(requested);
            tracing::info!("Overriding feed: {:.1}", requested);
        }
        out
    }
}

impl Default for GcodePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for GcodePreprocessor {
    fn tidy(&self, line: &str) -> String {
        let stripped = Self::strip_comments(line);
        if Self::is_droppable(&stripped) {
            return String::new();
        }
        stripped.split_whitespace().collect()
    }

    fn find_vars(&mut self, line: &str) {
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '#' {
                continue;
            }
            let mut key = String::new();
            while let Some(d) = chars.peek() {
                if d.is_ascii_digit() {
                    key.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if !key.is_empty() {
                self.vars.entry(key).or_insert(None);
            }
        }
    }

    fn vars(&self) -> &VarsMap {
        &self.vars
    }

    fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), Some(value.to_string()));
    }

    fn process(&mut self, line: &str) -> Result<Vec<String>, PreprocessError> {
        let substituted = self.substitute_vars(line)?;
        Ok(vec![self.override_feed(&substituted)])
    }

    fn set_feed_override(&mut self, enabled: bool) {
        self.do_feed_override = enabled;
    }

    fn request_feed(&mut self, feed: f64) {
        self.requested_feed = Some(feed);
    }

    fn reset(&mut self) {
        self.feed_last = None;
    }

    fn job_reset(&mut self) {
        self.vars.clear();
    }
}

/// Extract the F word value from a line, if present
fn parse_feed(line: &str) -> Option<f64> {
    let (start, len) = find_feed_word(line)?;
    line[start + 1..start + len].parse().ok()
}

/// Remove the F word (letter and value) from a line
fn strip_feed(line: &str) -> String {
    match find_feed_word(line) {
        Some((start, len)) => {
            let mut out = String::with_capacity(line.len());
            out.push_str(&line[..start]);
            out.push_str(&line[start + len..]);
            out
        }
        None => line.to_string(),
    }
}

// Returns (byte offset of 'F', length of the word including 'F').
fn find_feed_word(line: &str) -> Option<(usize, usize)> {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'F' {
            continue;
        }
        let mut end = i + 1;
        while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
            end += 1;
        }
        if bytes[i + 1..end].iter().any(|c| c.is_ascii_digit()) {
            return Some((i, end - i));
        }
    }
    None
}

fn is_var_assignment(line: &str) -> bool {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.strip_prefix('#') else {
        return false;
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && rest[digits..].trim_start().starts_with('=')
}
