//! Link event types.
//!
//! The protocol engine publishes everything a front end needs to show through
//! a `tokio::sync::broadcast` channel: log lines at two severities, the last
//! command sent and received, and the online/offline status. Timestamps are
//! measured from engine creation.

use std::fmt;
use std::time::Duration;

/// An event emitted by the protocol engine.
///
/// Events are delivered best-effort; a slow subscriber may lag and miss some.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Informational log line.
    Log {
        /// Time since the engine was created.
        at: Duration,
        /// Human-readable message.
        message: String,
    },

    /// Error log line (protocol desync, write failure, overflow).
    Error {
        /// Time since the engine was created.
        at: Duration,
        /// Human-readable message.
        message: String,
    },

    /// A command frame was transmitted to the console.
    CommandSent {
        /// Time since the engine was created.
        at: Duration,
        /// Short label such as `"INIT"` or `"KEYS"`.
        label: &'static str,
    },

    /// A command frame was received from the console.
    CommandReceived {
        /// Time since the engine was created.
        at: Duration,
        /// Short label such as `"QUERY"`.
        label: &'static str,
    },

    /// The console started or stopped powering the line.
    Status {
        /// Time since the engine was created.
        at: Duration,
        /// `true` when the console powers the line.
        online: bool,
    },
}

impl LinkEvent {
    /// Time since engine creation at which the event was produced.
    pub fn at(&self) -> Duration {
        match self {
            LinkEvent::Log { at, .. }
            | LinkEvent::Error { at, .. }
            | LinkEvent::CommandSent { at, .. }
            | LinkEvent::CommandReceived { at, .. }
            | LinkEvent::Status { at, .. } => *at,
        }
    }

    /// Returns `true` for [`LinkEvent::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, LinkEvent::Error { .. })
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}] ", self.at().as_secs_f64())?;
        match self {
            LinkEvent::Log { message, .. } => write!(f, "{message}"),
            LinkEvent::Error { message, .. } => write!(f, "ERROR: {message}"),
            LinkEvent::CommandSent { label, .. } => write!(f, "last command sent: {label}"),
            LinkEvent::CommandReceived { label, .. } => {
                write!(f, "last command received: {label}")
            }
            LinkEvent::Status { online: true, .. } => write!(f, "PSP serial port: ONLINE"),
            LinkEvent::Status { online: false, .. } => write!(f, "PSP serial port: OFFLINE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_timestamp() {
        let e = LinkEvent::Log {
            at: Duration::from_millis(1500),
            message: "Received: FRAME_RTS".into(),
        };
        assert_eq!(e.to_string(), "[1.500] Received: FRAME_RTS");
    }

    #[test]
    fn display_status() {
        let on = LinkEvent::Status {
            at: Duration::ZERO,
            online: true,
        };
        let off = LinkEvent::Status {
            at: Duration::ZERO,
            online: false,
        };
        assert_eq!(on.to_string(), "[0.000] PSP serial port: ONLINE");
        assert_eq!(off.to_string(), "[0.000] PSP serial port: OFFLINE");
    }

    #[test]
    fn error_flag() {
        let e = LinkEvent::Error {
            at: Duration::ZERO,
            message: "x".into(),
        };
        assert!(e.is_error());
        assert!(!LinkEvent::CommandSent {
            at: Duration::ZERO,
            label: "KEYS"
        }
        .is_error());
    }

    #[test]
    fn at_accessor() {
        let e = LinkEvent::CommandReceived {
            at: Duration::from_secs(2),
            label: "QUERY",
        };
        assert_eq!(e.at(), Duration::from_secs(2));
    }
}
