//! Transport implementations for psplink.
//!
//! This crate provides the serial implementation of the
//! [`Transport`](psplink_core::Transport) trait from `psplink-core`:
//!
//! - [`SerialTransport`]: RS-232 or USB-serial adapter on the PSP remote port
//! - [`SerialReader`]: receive pump delivering raw bytes to a callback
//!
//! # Example
//!
//! ```no_run
//! use psplink_transport::SerialTransport;
//! use psplink_core::transport::Transport;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> psplink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyS0", 4800).await?;
//!
//! let cancel = CancellationToken::new();
//! if let Some(reader) = transport.take_reader() {
//!     reader.spawn(cancel.clone(), |bytes| println!("{bytes:02X?}"));
//! }
//!
//! // Request To Send
//! transport.send(&[0xF0]).await?;
//! cancel.cancel();
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{PowerLine, SerialConfig, SerialReader, SerialTransport, DEFAULT_BAUD_RATE};
