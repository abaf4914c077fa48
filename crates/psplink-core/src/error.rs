//! Error types for psplink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, protocol failures and
//! rejected caller input are all captured here.
//!
//! Most protocol problems never reach a caller: the engine logs them and keeps
//! polling. The variants that do surface are malformed command payloads
//! ([`Error::InvalidPayload`]), a full queue in strict mode
//! ([`Error::QueueFull`]) and transport-level failures.

/// The error type for all psplink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open, modem line query, flush).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed frame, bad checksum).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A command payload string was rejected before queueing.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    /// The command queue is full and configured to reject new entries.
    #[error("command queue full ({capacity} entries)")]
    QueueFull {
        /// Capacity of the queue that rejected the command.
        capacity: usize,
    },

    /// A configuration value was missing or out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the serial port has been established.
    #[error("not connected")]
    NotConnected,

    /// The serial port went away unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a payload string such as `"01 A8 00 47"` is rejected.
///
/// Payloads are written as two-digit hexadecimal pairs separated by a single
/// space. The rules are checked in the order listed here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// `len % 3 != 2`: empty, odd digit count, or a trailing space.
    #[error("'{0}' is not in format 'xx xx xx .. xx' (trailing space?)")]
    Length(String),

    /// A byte pair is not followed by a single space.
    #[error("'{input}' is not in format 'xx xx xx .. xx' (no separator at offset {offset})")]
    MissingSeparator {
        /// The rejected payload string.
        input: String,
        /// Byte offset where the space was expected.
        offset: usize,
    },

    /// A character outside `0-9`, `a-f`, `A-F`.
    #[error("invalid hex character: {0:?}")]
    InvalidHex(char),

    /// More bytes than a single frame can carry.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    TooLong {
        /// Number of bytes in the payload.
        len: usize,
        /// Maximum number of payload bytes per frame.
        max: usize,
    },
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("checksum mismatch".into());
        assert_eq!(e.to_string(), "protocol error: checksum mismatch");
    }

    #[test]
    fn error_display_queue_full() {
        let e = Error::QueueFull { capacity: 16 };
        assert_eq!(e.to_string(), "command queue full (16 entries)");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn payload_error_wraps_into_error() {
        let e: Error = PayloadError::InvalidHex('g').into();
        assert!(matches!(e, Error::InvalidPayload(PayloadError::InvalidHex('g'))));
        assert_eq!(e.to_string(), "invalid payload: invalid hex character: 'g'");
    }

    #[test]
    fn payload_error_length_mentions_trailing_space() {
        let e = PayloadError::Length("01 01 01 ".into());
        assert!(e.to_string().contains("trailing space"));
    }

    #[test]
    fn payload_error_too_long() {
        let e = PayloadError::TooLong { len: 11, max: 10 };
        assert_eq!(
            e.to_string(),
            "payload of 11 bytes exceeds the 10-byte frame limit"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
