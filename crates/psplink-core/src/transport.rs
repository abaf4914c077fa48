//! Transport trait for the console link.
//!
//! The [`Transport`] trait abstracts over the physical link to the console's
//! remote port. The protocol engine in `psplink-protocol` only ever talks to a
//! `Transport`, so the same engine drives a real RS-232 port
//! (`psplink-transport`) or the `MockTransport` from `psplink-test-harness`.
//!
//! Receiving is deliberately not part of this trait. Inbound bytes arrive
//! through a separate producer (a reader task, an interrupt-style callback, or
//! a test) that feeds the engine's receive buffer, so the engine's poll step
//! never waits on the port.

use async_trait::async_trait;

use crate::error::Result;

/// Byte-level, write-side transport to the console.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes to the console.
    ///
    /// Returns the number of bytes actually written, which may be less than
    /// `data.len()`. The engine treats a short write like a failed one.
    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Whether the console is currently powering the line.
    ///
    /// On a serial port this reads a modem status input (CTS by default).
    fn power_detected(&mut self) -> Result<bool>;

    /// Discard any bytes received by the port but not yet read.
    fn flush_input(&mut self) -> Result<()>;

    /// Close the transport.
    ///
    /// After calling `close()`, subsequent calls should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
