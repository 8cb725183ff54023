//! grbl error and alarm code decoding
//!
//! grbl 1.x reports numeric codes (`error:22`, `ALARM:2`); grbl 0.9
//! reports text. `describe_error`/`describe_alarm` accept either and
//! always return something human-readable.

/// Decode a grbl 1.x error code
pub fn decode_error(code: u8) -> &'static str {
    match code {
        1 => "G-code word without a letter",
        2 => "Bad or missing numeric value",
        3 => "Unrecognized '$' system command",
        4 => "Negative value where a positive one is required",
        5 => "Homing is not enabled in settings",
        6 => "Step pulse must be greater than 3 microseconds",
        7 => "EEPROM read failed, settings restored to defaults",
        8 => "'$' command only allowed while idle",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits require homing to be enabled",
        11 => "Line exceeds the maximum length",
        12 => "Setting exceeds the supported step rate",
        13 => "Safety door open",
        14 => "Startup line too long for EEPROM",
        15 => "Jog target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported G-code command in block",
        21 => "More than one command from the same modal group",
        22 => "Feed rate not yet set or undefined",
        23 => "Command requires an integer value",
        24 => "Two commands both requiring axis words",
        25 => "G-code word repeated in block",
        26 => "Command requires axis words, none given",
        27 => "Line number out of range",
        28 => "Missing required P or L value word",
        29 => "Work coordinate systems G59.1-G59.3 are unsupported",
        30 => "G53 requires G0 or G1 to be active",
        31 => "Unused axis words with G80 active",
        32 => "Arc has no axis words in the selected plane",
        33 => "Motion target invalid",
        34 => "Arc radius calculation failed",
        35 => "Arc missing IJK offset word in the selected plane",
        36 => "Unused leftover value words in block",
        37 => "Tool length offset on an unconfigured axis",
        38 => "Tool number exceeds the supported maximum",
        _ => "Unknown error code",
    }
}

/// Decode a grbl 1.x alarm code
pub fn decode_alarm(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered; position likely lost, re-home",
        2 => "Motion target exceeds machine travel (soft limit)",
        3 => "Reset while in motion; position lost, re-home",
        4 => "Probe not in the expected initial state",
        5 => "Probe did not contact within the programmed travel",
        6 => "Homing fail: reset during the cycle",
        7 => "Homing fail: safety door opened during the cycle",
        8 => "Homing fail: could not clear the limit switch",
        9 => "Homing fail: limit switch not found within travel",
        _ => "Unknown alarm code",
    }
}

/// Describe an `error:` suffix: decodes numeric codes, passes grbl 0.9
/// text through unchanged.
pub fn describe_error(code: &str) -> String {
    match code.parse::<u8>() {
        Ok(n) => decode_error(n).to_string(),
        Err(_) => code.to_string(),
    }
}

/// Describe an `ALARM:` suffix; same convention as [`describe_error`]
pub fn describe_alarm(code: &str) -> String {
    match code.parse::<u8>() {
        Ok(n) => decode_alarm(n).to_string(),
        Err(_) => code.to_string(),
    }
}
