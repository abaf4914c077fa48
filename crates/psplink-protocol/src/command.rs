//! Outbound commands and the hex payload syntax used to enqueue them.
//!
//! Callers describe a payload the way it is written in protocol notes:
//! two-digit hex bytes separated by single spaces, e.g. `"01 A8 00 47"`.
//! Parsing is strict. There is no trailing separator, no empty payload, and
//! nothing longer than a frame can carry.

use std::fmt;

use psplink_core::PayloadError;

use crate::frame::{CMD_ID, CMD_INIT, CMD_KEYS, MAX_PAYLOAD, PHASE_MASK};

/// One outbound instruction: an even command code and its data bytes.
///
/// Immutable once built. The phase bit is added at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: u8,
    payload: Vec<u8>,
}

impl Command {
    /// Build a command from raw bytes.
    ///
    /// The low bit of `code` is reserved for the phase and is cleared.
    pub fn new(code: u8, payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PayloadError::TooLong {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Command {
            code: code & !PHASE_MASK,
            payload: payload.to_vec(),
        })
    }

    /// Build a command from a `"xx xx .. xx"` hex payload.
    ///
    /// # Example
    ///
    /// ```
    /// use psplink_protocol::command::Command;
    /// use psplink_protocol::frame::CMD_ID;
    ///
    /// let cmd = Command::parse(CMD_ID, "01 a8 00 47").unwrap();
    /// assert_eq!(cmd.payload(), &[0x01, 0xA8, 0x00, 0x47]);
    /// ```
    pub fn parse(code: u8, hex: &str) -> Result<Self, PayloadError> {
        let payload = parse_payload(hex)?;
        Command::new(code, &payload)
    }

    /// The INIT command sent when the console comes online.
    pub fn init() -> Self {
        Command {
            code: CMD_INIT,
            payload: vec![0x01, 0x01, 0x01],
        }
    }

    /// The ID command sent right after INIT.
    pub fn id() -> Self {
        Command {
            code: CMD_ID,
            payload: vec![0x01, 0xA8, 0x00, 0x47],
        }
    }

    /// A KEYS report for a 16-bit key mask, low byte first.
    ///
    /// Key number `n` is `1 << n`. A mask of zero reports every key released.
    pub fn keys(mask: u16) -> Self {
        Command {
            code: CMD_KEYS,
            payload: mask.to_le_bytes().to_vec(),
        }
    }

    /// A KEYS report with no key held.
    pub fn keys_released() -> Self {
        Command::keys(0)
    }

    /// Command code, phase bit clear.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Data bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of data bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the command carries no data.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} [", self.code)?;
        for (i, b) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        f.write_str("]")
    }
}

/// Parse a `"xx xx .. xx"` payload into bytes.
///
/// Hex digits are case-insensitive. The input must be exactly `3n + 2`
/// characters long with a single space after every byte but the last.
pub fn parse_payload(hex: &str) -> Result<Vec<u8>, PayloadError> {
    let raw = hex.as_bytes();
    if raw.len() % 3 != 2 {
        return Err(PayloadError::Length(hex.to_string()));
    }

    let mut out = Vec::with_capacity(raw.len().div_ceil(3));
    for offset in (0..raw.len()).step_by(3) {
        if offset + 2 < raw.len() && raw[offset + 2] != b' ' {
            return Err(PayloadError::MissingSeparator {
                input: hex.to_string(),
                offset: offset + 2,
            });
        }
        let hi = hex_digit(raw[offset])?;
        let lo = hex_digit(raw[offset + 1])?;
        out.push((hi << 4) | lo);
    }

    if out.len() > MAX_PAYLOAD {
        return Err(PayloadError::TooLong {
            len: out.len(),
            max: MAX_PAYLOAD,
        });
    }
    Ok(out)
}

fn hex_digit(c: u8) -> Result<u8, PayloadError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(PayloadError::InvalidHex(c as char)),
    }
}
