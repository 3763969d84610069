//! Inbound line classification and the fixed command vocabulary.
//!
//! Marlin answers on the same line-oriented stream it reads commands from.
//! Only three kinds of reply matter to the command channel:
//!
//! | Reply                                   | Meaning                                  |
//! |-----------------------------------------|------------------------------------------|
//! | `ok`                                    | one line consumed, room for one more     |
//! | `Resend: 7`                             | retransmit from line 7 onwards           |
//! | `X:10.00 Y:20.00 Count X:0 Y:0`         | position report (reply to `M114`)        |
//!
//! Everything else (`echo:` chatter, start-up banners, temperature reports) is
//! diagnostic text that the channel logs and otherwise ignores.

use serde::{Deserialize, Serialize};

/// Marlin sends this when the robot is ready to receive more.
pub const OK_TOKEN: &str = "ok";

/// Marlin says this when a resend is needed, followed by the line number to
/// restart from.
pub const RESEND_MARKER: &str = "Resend: ";

/// Separates the logical joint values in a position report from the raw
/// stepper counts that follow.
pub const POSITION_COUNT_MARKER: &str = "Count";

/// No-op command used as a keepalive probe.  `M400` waits for the planner to
/// drain and then answers `ok`, so it never moves the robot.
pub const PROBE_COMMAND: &str = "M400";

/// Kills the firmware immediately.  Sent unsequenced.
pub const EMERGENCY_STOP_COMMAND: &str = "M112";

/// Asks the firmware to report the current joint positions.
pub const REPORT_POSITION_COMMAND: &str = "M114";

/// Linear move to the given joint values.
pub const LINEAR_MOVE_COMMAND: &str = "G1";

/// Declares the current position to be the given joint values.
pub const SET_POSITION_COMMAND: &str = "G92";

/// One `<Joint>:<value>` field from a position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointReading {
    pub name: String,
    pub value: f64,
}

/// The protocol-level meaning of one line received from the firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundLine {
    /// The acknowledgement token.
    Ack,
    /// A retransmission request starting at the given line number.
    Resend(u64),
    /// A position report with the joint values that preceded `Count`.
    PositionReport(Vec<JointReading>),
    /// A line that looked like a resend request or a position report but could
    /// not be parsed.  The channel logs it and carries on.
    Malformed { line: String, reason: String },
    /// Any other text.
    Text(String),
}

/// Classifies one inbound line.
///
/// Surrounding whitespace (including the `\r` many controllers emit) is
/// trimmed first.  Position reports are checked before the acknowledgement
/// token, and both before the resend marker.
///
/// # Examples
///
/// ```rust
/// use marlin_core::protocol::{classify_line, InboundLine};
///
/// assert_eq!(classify_line("ok\r"), InboundLine::Ack);
/// assert_eq!(classify_line("Resend: 7"), InboundLine::Resend(7));
/// ```
pub fn classify_line(raw: &str) -> InboundLine {
    let line = raw.trim();

    if starts_with_joint_token(line) && line.contains(POSITION_COUNT_MARKER) {
        return match parse_position_report(line) {
            Ok(readings) => InboundLine::PositionReport(readings),
            Err(reason) => InboundLine::Malformed {
                line: line.to_string(),
                reason,
            },
        };
    }

    if line.starts_with(OK_TOKEN) {
        return InboundLine::Ack;
    }

    if let Some(idx) = line.find(RESEND_MARKER) {
        let number = line[idx + RESEND_MARKER.len()..].trim();
        return match number.parse::<u64>() {
            Ok(n) => InboundLine::Resend(n),
            Err(e) => InboundLine::Malformed {
                line: line.to_string(),
                reason: format!("bad resend line number {number:?}: {e}"),
            },
        };
    }

    InboundLine::Text(line.to_string())
}

/// `true` when the line opens with `<letters>:` such as `X:` or `U:`.
fn starts_with_joint_token(line: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or("");
    match first.split_once(':') {
        Some((name, _)) => !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic()),
        None => false,
    }
}

/// Parses the `<Joint>:<value>` pairs that precede `Count`.
///
/// The usual format is
/// `X:0.00 Y:270.00 Z:0.00 U:270.00 V:180.00 W:0.00 Count X:0 Y:0 Z:0 U:0 V:0 W:0`.
/// Everything from `Count` onwards is ignored.  Tokens without a colon are
/// skipped; a colon-separated token whose value is not a number fails the
/// whole report so a half-applied position never reaches the robot.
fn parse_position_report(line: &str) -> Result<Vec<JointReading>, String> {
    let head = match line.find(POSITION_COUNT_MARKER) {
        Some(idx) => &line[..idx],
        None => line,
    };

    let mut readings = Vec::new();
    for token in head.split_whitespace() {
        let Some((name, value)) = token.split_once(':') else {
            continue;
        };
        let value: f64 = value
            .parse()
            .map_err(|e| format!("bad value for joint {name:?}: {value:?} ({e})"))?;
        readings.push(JointReading {
            name: name.to_string(),
            value,
        });
    }
    Ok(readings)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
