//! psplink-protocol: the PSP remote-port link protocol engine.
//!
//! The console's remote connector speaks a half-duplex serial protocol: an
//! RTS/CTS handshake before every command frame, XOR-checksummed frames with
//! an alternating phase bit, and single-byte ACKs. This crate implements the
//! host side of that link, emulating the wired remote.
//!
//! # Modules
//!
//! - [`frame`] -- wire constants, marker decoding, frame encoding
//! - [`command`] -- outbound commands and hex payload parsing
//! - [`queue`] -- bounded queue of commands awaiting acknowledgement
//! - [`rx_buffer`] -- lock-free SPSC ring between the port reader and the engine
//! - [`link`] -- link flags and the transitions between them
//! - [`engine`] -- [`ProtocolEngine`], one poll cycle per call
//! - [`builder`] -- [`EngineBuilder`] for configuration and serial setup
//!
//! # Example
//!
//! ```no_run
//! use psplink_protocol::{Command, EngineBuilder};
//!
//! # async fn example() -> psplink_core::Result<()> {
//! let mut engine = EngineBuilder::new().serial_port("/dev/ttyS0").build().await?;
//! let mut events = engine.subscribe();
//!
//! engine.enqueue_command(Command::keys(1 << 3))?;
//! engine.poll().await?;
//! while let Ok(event) = events.try_recv() {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod command;
pub mod engine;
pub mod frame;
pub mod link;
pub mod queue;
pub mod rx_buffer;

pub use builder::EngineBuilder;
pub use command::Command;
pub use engine::{EngineConfig, ProtocolEngine};
pub use frame::Phase;
pub use link::{LinkFlags, LinkState};
pub use queue::{CommandQueue, OverflowPolicy};
pub use rx_buffer::{rx_buffer, RxConsumer, RxProducer};
