//! Line codec for numbered, checksummed Marlin commands.
//!
//! Wire format (one command per line, newline added by the transport):
//! ```text
//! N<seq> <payload>*<checksum>
//! ```
//! `<checksum>` is the XOR of every byte of `N<seq> <payload>`, interpreted as
//! a *signed* byte and rendered in decimal.  For plain ASCII payloads the top
//! bit is never set, so the value is always `0..=127`; payloads with non-ASCII
//! text (for example an `M117` LCD message) can produce negative values.
//!
//! # Why XOR? (for beginners)
//!
//! XOR is cheap enough for an 8-bit microcontroller to compute on every byte
//! as it arrives, and flipping any single bit of the line flips the same bit
//! of the checksum.  It cannot detect two errors that cancel out, but on a
//! serial link the common failure is one garbled or dropped character.

use thiserror::Error;

/// Errors that can occur when decoding a wire line back into its parts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The line does not start with the `N` line-number prefix.
    #[error("missing line number prefix in {0:?}")]
    MissingLineNumber(String),

    /// The text between `N` and the first space is not a decimal integer.
    #[error("invalid line number {0:?}")]
    InvalidLineNumber(String),

    /// The line has no `*<checksum>` suffix.
    #[error("missing checksum suffix in {0:?}")]
    MissingChecksum(String),

    /// The checksum suffix is not a signed decimal byte.
    #[error("invalid checksum {0:?}")]
    InvalidChecksum(String),

    /// The checksum suffix does not match the XOR of the line body.
    #[error("checksum mismatch: line says {declared}, computed {computed}")]
    ChecksumMismatch { declared: i8, computed: i8 },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Computes the XOR checksum of `line` as a signed byte.
///
/// `line` must include the leading `N<seq> ` token and exclude the `*` field.
///
/// # Examples
///
/// ```rust
/// use marlin_core::protocol::checksum;
///
/// assert_eq!(checksum("N1 M114"), 38);
/// assert_eq!(checksum(""), 0);
/// ```
pub fn checksum(line: &str) -> i8 {
    line.bytes().fold(0u8, |acc, b| acc ^ b) as i8
}

/// Encodes a payload into its numbered, checksummed wire text.
///
/// The returned string has no trailing newline; the transport appends it.
///
/// # Examples
///
/// ```rust
/// use marlin_core::protocol::encode_command;
///
/// assert_eq!(encode_command(1, "M114"), "N1 M114*38");
/// ```
pub fn encode_command(sequence_number: u64, payload: &str) -> String {
    let body = format!("N{sequence_number} {payload}");
    let sum = checksum(&body);
    format!("{body}*{sum}")
}

/// Decodes wire text produced by [`encode_command`] back into
/// `(sequence_number, payload)`, verifying the checksum.
///
/// A trailing `\r` or `\n` is tolerated so raw lines read off a socket can be
/// passed in directly.  The *last* `*` in the line starts the checksum, so a
/// payload may itself contain `*`.
///
/// # Errors
///
/// Returns a [`CodecError`] describing the first structural problem found, or
/// [`CodecError::ChecksumMismatch`] when the line is well-formed but corrupt.
///
/// # Examples
///
/// ```rust
/// use marlin_core::protocol::{decode_command, encode_command};
///
/// let wire = encode_command(42, "G1 X10.000");
/// let (seq, payload) = decode_command(&wire).unwrap();
/// assert_eq!(seq, 42);
/// assert_eq!(payload, "G1 X10.000");
/// ```
pub fn decode_command(wire: &str) -> Result<(u64, String), CodecError> {
    let line = wire.trim_end_matches(['\r', '\n']);

    let star = line
        .rfind('*')
        .ok_or_else(|| CodecError::MissingChecksum(line.to_string()))?;
    let (body, suffix) = line.split_at(star);
    let declared: i8 = suffix[1..]
        .parse()
        .map_err(|_| CodecError::InvalidChecksum(suffix[1..].to_string()))?;

    let numbered = body
        .strip_prefix('N')
        .ok_or_else(|| CodecError::MissingLineNumber(line.to_string()))?;
    let (number, payload) = numbered
        .split_once(' ')
        .ok_or_else(|| CodecError::InvalidLineNumber(numbered.to_string()))?;
    let sequence_number: u64 = number
        .parse()
        .map_err(|_| CodecError::InvalidLineNumber(number.to_string()))?;

    let computed = checksum(body);
    if computed != declared {
        return Err(CodecError::ChecksumMismatch { declared, computed });
    }

    Ok((sequence_number, payload.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_of_empty_line_is_zero() {
        assert_eq!(checksum(""), 0);
    }

    #[test]
    fn test_checksum_matches_known_marlin_values() {
        // Arrange / Act / Assert – values computed by hand from the byte XOR
        assert_eq!(checksum("N1 G1 X10"), 80);
        assert_eq!(checksum("N3 G28"), 16);
        assert_eq!(checksum("N7 G1 X10.000 Y20.000"), 45);
    }

    #[test]
    fn test_checksum_is_signed_for_high_bit_payloads() {
        // '€' is three UTF-8 bytes with the top bit set, so the XOR keeps it
        assert_eq!(checksum("N1 M117 €"), -55);
    }

    #[test]
    fn test_encode_command_formats_number_payload_and_checksum() {
        // Arrange
        let seq = 1;

        // Act
        let wire = encode_command(seq, "G1 X10.0 Y20.0");

        // Assert
        assert_eq!(wire, "N1 G1 X10.0 Y20.0*43");
    }

    #[test]
    fn test_encode_command_renders_negative_checksum() {
        assert_eq!(encode_command(1, "M117 €"), "N1 M117 €*-55");
    }

    #[test]
    fn test_decode_command_accepts_trailing_newline() {
        let (seq, payload) = decode_command("N12 M400*20\r\n").unwrap();
        assert_eq!(seq, 12);
        assert_eq!(payload, "M400");
    }

    #[test]
    fn test_decode_command_allows_star_inside_payload() {
        // Arrange
        let wire = encode_command(9, "M117 a*b");

        // Act
        let decoded = decode_command(&wire);

        // Assert
        assert_eq!(decoded, Ok((9, "M117 a*b".to_string())));
    }

    #[test]
    fn test_decode_command_rejects_missing_checksum() {
        assert!(matches!(
            decode_command("N1 G28"),
            Err(CodecError::MissingChecksum(_))
        ));
    }

    #[test]
    fn test_decode_command_rejects_missing_line_number() {
        assert!(matches!(
            decode_command("G28*16"),
            Err(CodecError::MissingLineNumber(_))
        ));
    }

    #[test]
    fn test_decode_command_rejects_non_numeric_line_number() {
        assert!(matches!(
            decode_command("Nx G28*16"),
            Err(CodecError::InvalidLineNumber(_))
        ));
    }

    #[test]
    fn test_decode_command_rejects_unparsable_checksum() {
        assert!(matches!(
            decode_command("N3 G28*abc"),
            Err(CodecError::InvalidChecksum(_))
        ));
    }

    #[test]
    fn test_decode_command_detects_corrupted_payload() {
        // Arrange – "G28" garbled into "G29" in transit
        let wire = encode_command(3, "G28").replace("G28", "G29");

        // Act
        let result = decode_command(&wire);

        // Assert
        assert_eq!(
            result,
            Err(CodecError::ChecksumMismatch {
                declared: 16,
                computed: checksum("N3 G29"),
            })
        );
    }
}
