//! PSP remote-port frame encoder/decoder.
//!
//! The remote port speaks a half-duplex protocol at 4800 baud made of two
//! kinds of traffic: single-byte control markers (handshake and
//! acknowledgements) and delimited command frames. This module handles the
//! pure byte-level encoding and decoding of both.
//!
//! # Frame format
//!
//! ```text
//! 0xFD <code|phase> [<data>...] <checksum> 0xFE
//! ```
//!
//! - Start delimiter: `0xFD`
//! - `code|phase`: even command code with the phase bit in bit 0
//! - `data`: up to [`MAX_PAYLOAD`] bytes
//! - `checksum`: XOR of `code|phase` and every data byte
//! - Stop delimiter: `0xFE`
//!
//! # Control markers
//!
//! | Byte   | Meaning                       |
//! |--------|-------------------------------|
//! | `0xF0` | RTS, "I want to send"         |
//! | `0xF8` | CTS, "go ahead"               |
//! | `0xFA` | ACK, phase 0                  |
//! | `0xFB` | ACK, phase 1                  |

use std::fmt;

use bytes::{BufMut, BytesMut};
use psplink_core::{Error, Result};

use crate::command::Command;

/// Command frame start delimiter.
pub const FRAME_START: u8 = 0xFD;

/// Command frame stop delimiter.
pub const FRAME_STOP: u8 = 0xFE;

/// Request To Send: the sender wants the line.
pub const RTS: u8 = 0xF0;

/// Clear To Send: the peer may transmit its command frame.
pub const CTS: u8 = 0xF8;

/// Acknowledgement for a phase-0 frame.
pub const ACK0: u8 = 0xFA;

/// Acknowledgement for a phase-1 frame.
pub const ACK1: u8 = 0xFB;

/// Console poll for remote state (console to host).
pub const CMD_QUERY: u8 = 0x02;

/// Remote initialisation (host to console).
pub const CMD_INIT: u8 = 0x80;

/// Remote identification (host to console).
pub const CMD_ID: u8 = 0x82;

/// Key state report (host to console).
pub const CMD_KEYS: u8 = 0x84;

/// First QUERY data byte asking the remote to report its keys.
pub const QUERY_SENTINEL: u8 = 0x01;

/// Maximum number of data bytes in a command frame.
pub const MAX_PAYLOAD: usize = 10;

/// Bit of the command byte that carries the phase.
pub const PHASE_MASK: u8 = 0x01;

/// Alternating parity bit stamped on command frames and their ACKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Zero,
    One,
}

impl Phase {
    /// Extract the phase from the low bit of a command or ACK byte.
    pub fn from_bit(byte: u8) -> Self {
        if byte & PHASE_MASK == 0 {
            Phase::Zero
        } else {
            Phase::One
        }
    }

    /// The phase as a single bit (`0` or `1`).
    pub fn bit(self) -> u8 {
        match self {
            Phase::Zero => 0,
            Phase::One => 1,
        }
    }

    /// The other phase.
    pub fn toggled(self) -> Self {
        match self {
            Phase::Zero => Phase::One,
            Phase::One => Phase::Zero,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bit())
    }
}

/// Classification of a single received byte outside of a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Rts,
    Cts,
    FrameStart,
    FrameStop,
    Ack(Phase),
    /// Any other byte. Logged and ignored by the engine.
    Unrecognized(u8),
}

/// Classify one byte read from the line.
///
/// # Example
///
/// ```
/// use psplink_protocol::frame::{decode_marker, Marker, Phase};
///
/// assert_eq!(decode_marker(0xF0), Marker::Rts);
/// assert_eq!(decode_marker(0xFB), Marker::Ack(Phase::One));
/// assert_eq!(decode_marker(0x42), Marker::Unrecognized(0x42));
/// ```
pub fn decode_marker(byte: u8) -> Marker {
    match byte {
        RTS => Marker::Rts,
        CTS => Marker::Cts,
        FRAME_START => Marker::FrameStart,
        FRAME_STOP => Marker::FrameStop,
        ACK0 | ACK1 => Marker::Ack(Phase::from_bit(byte)),
        other => Marker::Unrecognized(other),
    }
}

/// The ACK byte for a frame received with the given phase.
pub fn encode_ack(phase: Phase) -> u8 {
    ACK0 | phase.bit()
}

/// Running XOR checksum seeded with the phase-stamped command byte.
pub fn checksum(code_with_phase: u8, data: &[u8]) -> u8 {
    data.iter().fold(code_with_phase, |acc, &b| acc ^ b)
}

/// Encode a command frame into raw bytes ready for transmission.
///
/// The phase bit is OR-ed into `code`. The caller is responsible for keeping
/// `data` within [`MAX_PAYLOAD`]; [`Command`] guarantees it.
///
/// # Example
///
/// ```
/// use psplink_protocol::frame::{encode_frame, Phase, CMD_KEYS};
///
/// let bytes = encode_frame(CMD_KEYS, &[0x00, 0x00], Phase::One);
/// assert_eq!(bytes, vec![0xFD, 0x85, 0x00, 0x00, 0x85, 0xFE]);
/// ```
pub fn encode_frame(code: u8, data: &[u8], phase: Phase) -> Vec<u8> {
    let stamped = (code & !PHASE_MASK) | phase.bit();
    let mut buf = BytesMut::with_capacity(data.len() + 4);
    buf.put_u8(FRAME_START);
    buf.put_u8(stamped);
    buf.put_slice(data);
    buf.put_u8(checksum(stamped, data));
    buf.put_u8(FRAME_STOP);
    buf.to_vec()
}

/// Encode a queued [`Command`] with the given phase.
pub fn encode_command(command: &Command, phase: Phase) -> Vec<u8> {
    encode_frame(command.code(), command.payload(), phase)
}

/// A complete command frame parsed back from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command code with the phase bit stripped.
    pub code: u8,
    /// Phase bit carried by the command byte.
    pub phase: Phase,
    /// Data bytes between the command byte and the checksum.
    pub data: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
}

/// Decode one complete command frame and verify its checksum.
///
/// `buf` must hold exactly one frame, from the start delimiter through the
/// stop delimiter. The live receive path never calls this; it trusts inbound
/// checksums and dispatches byte by byte. This is for diagnostics and tools
/// that capture whole frames.
///
/// # Example
///
/// ```
/// use psplink_protocol::frame::{decode_frame, Phase, CMD_INIT};
///
/// let frame = decode_frame(&[0xFD, 0x80, 0x01, 0x01, 0x01, 0x81, 0xFE]).unwrap();
/// assert_eq!(frame.code, CMD_INIT);
/// assert_eq!(frame.phase, Phase::Zero);
/// assert_eq!(frame.data, vec![0x01, 0x01, 0x01]);
/// ```
pub fn decode_frame(buf: &[u8]) -> Result<CommandFrame> {
    // start + command + checksum + stop
    if buf.len() < 4 {
        return Err(Error::Protocol(format!(
            "frame too short: {} bytes",
            buf.len()
        )));
    }
    if buf[0] != FRAME_START {
        return Err(Error::Protocol(format!(
            "expected frame start 0x{FRAME_START:02X}, got 0x{:02X}",
            buf[0]
        )));
    }
    let last = buf.len() - 1;
    if buf[last] != FRAME_STOP {
        return Err(Error::Protocol(format!(
            "expected frame stop 0x{FRAME_STOP:02X}, got 0x{:02X}",
            buf[last]
        )));
    }

    let stamped = buf[1];
    let data = &buf[2..last - 1];
    let received = buf[last - 1];

    if data.len() > MAX_PAYLOAD {
        return Err(Error::Protocol(format!(
            "frame carries {} data bytes, limit is {MAX_PAYLOAD}",
            data.len()
        )));
    }

    let expected = checksum(stamped, data);
    if expected != received {
        return Err(Error::Protocol(format!(
            "checksum mismatch: expected 0x{expected:02X}, got 0x{received:02X}"
        )));
    }

    Ok(CommandFrame {
        code: stamped & !PHASE_MASK,
        phase: Phase::from_bit(stamped),
        data: data.to_vec(),
        checksum: received,
    })
}

/// Short display label for a command code, ignoring the phase bit.
pub fn command_label(code: u8) -> &'static str {
    match code & !PHASE_MASK {
        CMD_QUERY => "QUERY",
        CMD_INIT => "INIT",
        CMD_ID => "ID",
        CMD_KEYS => "KEYS",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Markers
    // ---------------------------------------------------------------

    #[test]
    fn decode_all_markers() {
        assert_eq!(decode_marker(0xF0), Marker::Rts);
        assert_eq!(decode_marker(0xF8), Marker::Cts);
        assert_eq!(decode_marker(0xFD), Marker::FrameStart);
        assert_eq!(decode_marker(0xFE), Marker::FrameStop);
        assert_eq!(decode_marker(0xFA), Marker::Ack(Phase::Zero));
        assert_eq!(decode_marker(0xFB), Marker::Ack(Phase::One));
    }

    #[test]
    fn decode_unrecognized() {
        assert_eq!(decode_marker(0x00), Marker::Unrecognized(0x00));
        assert_eq!(decode_marker(0xF9), Marker::Unrecognized(0xF9));
        assert_eq!(decode_marker(0xFF), Marker::Unrecognized(0xFF));
    }

    #[test]
    fn ack_carries_phase() {
        assert_eq!(encode_ack(Phase::Zero), 0xFA);
        assert_eq!(encode_ack(Phase::One), 0xFB);
    }

    #[test]
    fn phase_toggle_and_bits() {
        assert_eq!(Phase::Zero.toggled(), Phase::One);
        assert_eq!(Phase::One.toggled(), Phase::Zero);
        assert_eq!(Phase::from_bit(0x85), Phase::One);
        assert_eq!(Phase::from_bit(0x84), Phase::Zero);
        assert_eq!(Phase::default(), Phase::Zero);
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    #[test]
    fn encode_init_phase_zero() {
        let bytes = encode_frame(CMD_INIT, &[0x01, 0x01, 0x01], Phase::Zero);
        // 0x80 ^ 0x01 ^ 0x01 ^ 0x01 = 0x81
        assert_eq!(bytes, vec![0xFD, 0x80, 0x01, 0x01, 0x01, 0x81, 0xFE]);
    }

    #[test]
    fn encode_id_phase_one() {
        let bytes = encode_frame(CMD_ID, &[0x01, 0xA8, 0x00, 0x47], Phase::One);
        let cs = 0x83 ^ 0x01 ^ 0xA8 ^ 0x00 ^ 0x47;
        assert_eq!(bytes, vec![0xFD, 0x83, 0x01, 0xA8, 0x00, 0x47, cs, 0xFE]);
    }

    #[test]
    fn encode_empty_payload() {
        let bytes = encode_frame(CMD_KEYS, &[], Phase::Zero);
        assert_eq!(bytes, vec![0xFD, 0x84, 0x84, 0xFE]);
    }

    #[test]
    fn encode_strips_stray_phase_bit() {
        let bytes = encode_frame(0x85, &[], Phase::Zero);
        assert_eq!(bytes[1], 0x84);
    }

    #[test]
    fn encode_queued_command() {
        let cmd = Command::keys(0x0001);
        let bytes = encode_command(&cmd, Phase::Zero);
        assert_eq!(bytes, vec![0xFD, 0x84, 0x01, 0x00, 0x85, 0xFE]);
    }

    // ---------------------------------------------------------------
    // Decoding whole frames
    // ---------------------------------------------------------------

    #[test]
    fn decode_recovers_encoded_frame() {
        let data = [0x01, 0xA8, 0x00, 0x47];
        let bytes = encode_frame(CMD_ID, &data, Phase::One);
        let frame = decode_frame(&bytes).unwrap();
        assert_eq!(frame.code, CMD_ID);
        assert_eq!(frame.phase, Phase::One);
        assert_eq!(frame.data, data.to_vec());
        assert_eq!(frame.checksum, checksum(0x83, &data));
    }

    #[test]
    fn decode_query_from_console() {
        let frame = decode_frame(&[0xFD, 0x03, 0x01, 0x02, 0xFE]).unwrap();
        assert_eq!(frame.code, CMD_QUERY);
        assert_eq!(frame.phase, Phase::One);
        assert_eq!(frame.data, vec![0x01]);
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let result = decode_frame(&[0xFD, 0x80, 0x01, 0x01, 0x01, 0x80, 0xFE]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn decode_rejects_missing_delimiters() {
        assert!(decode_frame(&[0x00, 0x84, 0x84, 0xFE]).is_err());
        assert!(decode_frame(&[0xFD, 0x84, 0x84, 0x00]).is_err());
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(decode_frame(&[]).is_err());
        assert!(decode_frame(&[0xFD, 0x84, 0xFE]).is_err());
    }

    #[test]
    fn decode_rejects_oversized_payload() {
        let data = [0u8; MAX_PAYLOAD + 1];
        let mut bytes = vec![FRAME_START, CMD_KEYS];
        bytes.extend_from_slice(&data);
        bytes.push(checksum(CMD_KEYS, &data));
        bytes.push(FRAME_STOP);
        assert!(decode_frame(&bytes).is_err());
    }

    // ---------------------------------------------------------------
    // Labels
    // ---------------------------------------------------------------

    #[test]
    fn labels_ignore_phase() {
        assert_eq!(command_label(0x02), "QUERY");
        assert_eq!(command_label(0x03), "QUERY");
        assert_eq!(command_label(0x80), "INIT");
        assert_eq!(command_label(0x83), "ID");
        assert_eq!(command_label(0x84), "KEYS");
        assert_eq!(command_label(0x10), "UNKNOWN");
    }
}
