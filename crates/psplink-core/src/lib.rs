//! psplink-core: Core traits, events, and error definitions for psplink.
//!
//! This crate defines the abstractions shared by the protocol engine, the
//! serial transport and the test harness, without pulling in any of them.
//!
//! # Key types
//!
//! - [`Transport`] -- write-side byte channel plus power detection
//! - [`LinkEvent`] -- log and status notifications for front ends
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;

pub use error::{Error, PayloadError, Result};
pub use events::LinkEvent;
pub use transport::Transport;
