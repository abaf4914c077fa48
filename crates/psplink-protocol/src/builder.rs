//! EngineBuilder -- fluent builder for constructing [`ProtocolEngine`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, buffer sizes and protocol timing before the port
//! is opened.
//!
//! # Example
//!
//! ```no_run
//! use psplink_protocol::builder::EngineBuilder;
//! use psplink_transport::PowerLine;
//!
//! # async fn example() -> psplink_core::Result<()> {
//! let mut engine = EngineBuilder::new()
//!     .serial_port("/dev/ttyS0")
//!     .power_line(PowerLine::ClearToSend)
//!     .build()
//!     .await?;
//!
//! loop {
//!     engine.poll().await?;
//!     tokio::time::sleep(std::time::Duration::from_millis(2)).await;
//! }
//! # }
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use psplink_core::error::{Error, Result};
use psplink_core::transport::Transport;
use psplink_transport::{PowerLine, SerialConfig, SerialTransport};

use crate::engine::{EngineConfig, ProtocolEngine, ReceivePump};
use crate::queue::OverflowPolicy;
use crate::rx_buffer::{rx_buffer, RxProducer};

/// Fluent builder for [`ProtocolEngine`].
///
/// Every setting has a default matching the PSP remote port, so the
/// simplest usage is:
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .serial_port("/dev/ttyS0")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    serial_port: Option<String>,
    serial: SerialConfig,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            serial_port: None,
            serial: SerialConfig::default(),
            config: EngineConfig::default(),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyS0` or `COM1`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate (default: 4800).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial.baud_rate = baud;
        self
    }

    /// Select the modem status input that reports console power (default: CTS).
    pub fn power_line(mut self, line: PowerLine) -> Self {
        self.serial.power_line = line;
        self
    }

    /// How long an inbound frame may wait, once, for bytes that have not arrived
    /// (default: ten byte times at 4800 baud, 20.84ms).
    pub fn frame_wait(mut self, wait: Duration) -> Self {
        self.config.frame_wait = wait;
        self
    }

    /// Bytes to scan for the end of an unknown command frame (default: 12).
    pub fn scan_limit(mut self, bytes: usize) -> Self {
        self.config.scan_limit = bytes;
        self
    }

    /// Number of pending commands (default: 16).
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    /// What to do when the command queue is full (default: overwrite oldest).
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    /// Receive ring size in bytes, rounded up to a power of two (default: 256).
    pub fn rx_capacity(mut self, bytes: usize) -> Self {
        self.config.rx_capacity = bytes;
        self
    }

    /// Event channel size (default: 256).
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.config.event_capacity = n;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.config.queue_capacity == 0 {
            return Err(Error::InvalidParameter(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.config.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.config.scan_limit == 0 {
            return Err(Error::InvalidParameter(
                "scan_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Build an engine around a caller-provided transport.
    ///
    /// Returns the engine and the producing end of its receive ring. Whatever
    /// delivers received bytes (a reader task, a test) pushes them there.
    /// This is the entry point for testing with `MockTransport` from
    /// `psplink-test-harness`.
    pub fn build_with_transport(
        self,
        transport: Box<dyn Transport>,
    ) -> Result<(ProtocolEngine, RxProducer)> {
        self.validate()?;
        let (producer, consumer) = rx_buffer(self.config.rx_capacity);
        Ok((ProtocolEngine::new(transport, consumer, self.config), producer))
    }

    /// Open the serial port and build an engine fed by a receive pump.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<ProtocolEngine> {
        self.validate()?;
        let port = self
            .serial_port
            .clone()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let mut transport = SerialTransport::open_with_config(&port, self.serial.clone()).await?;
        let reader = transport
            .take_reader()
            .ok_or_else(|| Error::Transport(format!("no receive handle for {port}")))?;

        let (mut engine, producer) = self.build_with_transport(Box::new(transport))?;

        let cancel = CancellationToken::new();
        let task = reader.spawn(cancel.clone(), fill_ring(producer));
        engine.attach_pump(ReceivePump { cancel, task });

        Ok(engine)
    }
}

/// Receive callback for the serial pump: buffer the bytes and nothing else.
///
/// Bytes the ring cannot take are counted there and reported by the engine on
/// its next read.
fn fill_ring(mut producer: RxProducer) -> impl FnMut(&[u8]) + Send + 'static {
    move |bytes| {
        producer.push_slice(bytes);
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RTS;
    use psplink_test_harness::MockTransport;

    #[tokio::test]
    async fn builder_defaults() {
        let (engine, producer) = EngineBuilder::new()
            .build_with_transport(Box::new(MockTransport::new()))
            .unwrap();

        let config = engine.config();
        assert_eq!(config.frame_wait, Duration::from_micros(20_840));
        assert_eq!(config.scan_limit, 12);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.overflow_policy, OverflowPolicy::Overwrite);
        assert_eq!(engine.queue().capacity(), 16);
        assert_eq!(producer.capacity(), 256);
        assert!(!engine.is_online());
    }

    #[tokio::test]
    async fn builder_custom_settings() {
        let (engine, producer) = EngineBuilder::new()
            .frame_wait(Duration::from_millis(5))
            .scan_limit(32)
            .queue_capacity(4)
            .overflow_policy(OverflowPolicy::Reject)
            .rx_capacity(100)
            .event_capacity(8)
            .build_with_transport(Box::new(MockTransport::new()))
            .unwrap();

        assert_eq!(engine.config().frame_wait, Duration::from_millis(5));
        assert_eq!(engine.config().scan_limit, 32);
        assert_eq!(engine.queue().capacity(), 4);
        assert_eq!(engine.queue().policy(), OverflowPolicy::Reject);
        assert_eq!(producer.capacity(), 128);
    }

    #[tokio::test]
    async fn builder_rejects_zero_capacities() {
        let result = EngineBuilder::new()
            .queue_capacity(0)
            .build_with_transport(Box::new(MockTransport::new()));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        let result = EngineBuilder::new()
            .event_capacity(0)
            .build_with_transport(Box::new(MockTransport::new()));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        let result = EngineBuilder::new()
            .scan_limit(0)
            .build_with_transport(Box::new(MockTransport::new()));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_requires_serial_port() {
        let result = EngineBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_fails_on_missing_device() {
        let result = EngineBuilder::new()
            .serial_port("/dev/psplink-does-not-exist")
            .build()
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn receive_callback_only_buffers() {
        let (producer, mut consumer) = rx_buffer(4);
        let mut on_data = fill_ring(producer);

        on_data(&[0xF0, 0xF8, 0xFA, 0xFB, 0xFD, 0xFE]);

        assert_eq!(consumer.len(), 4);
        assert_eq!(consumer.take_overflow(), 2);
        assert_eq!(consumer.pop(), Some(0xF0));
    }

    #[tokio::test]
    async fn producer_feeds_engine() {
        let mock = MockTransport::powered();
        let handle = mock.handle();
        let (mut engine, mut producer) = EngineBuilder::new()
            .build_with_transport(Box::new(mock))
            .unwrap();

        engine.poll().await.unwrap();
        handle.take_sent();

        // The console asks for the line; CTS goes straight back.
        producer.push(RTS);
        engine.poll().await.unwrap();
        assert_eq!(handle.sent_bytes(), vec![crate::frame::CTS]);
    }
}
