//! psplink-test-harness: Test utilities for psplink.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of the
//! protocol engine without a console or a serial adapter, and [`MockHandle`]
//! for steering and inspecting it after the engine has taken ownership.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport, WriteBehavior};
