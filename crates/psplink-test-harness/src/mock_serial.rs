//! Mock transport for deterministic testing of the protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait without hardware. The
//! transport itself is moved into the engine, so tests steer and inspect it
//! through a cloned [`MockHandle`]: flip the console's power line, make writes
//! fail or come up short, and read back every byte the engine transmitted.
//!
//! # Example
//!
//! ```
//! use psplink_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let handle = mock.handle();
//! handle.set_power(true);
//! assert!(handle.sent_bytes().is_empty());
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use psplink_core::error::{Error, Result};
use psplink_core::transport::Transport;

/// How the mock answers `send()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteBehavior {
    /// Accept every byte.
    #[default]
    Accept,
    /// Accept at most this many bytes per call.
    Short(usize),
    /// Fail with an I/O error.
    Fail,
}

#[derive(Debug, Default)]
struct MockState {
    /// Whether the console powers the line.
    power: bool,
    /// Fail power queries with a transport error.
    power_fault: bool,
    /// How `send()` behaves.
    write_behavior: WriteBehavior,
    /// Log of all bytes accepted by `send()`, one entry per call.
    sent_log: Vec<Vec<u8>>,
    /// Number of `flush_input()` calls.
    input_flushes: usize,
    /// Whether the transport is "connected".
    connected: bool,
}

/// A mock [`Transport`] for testing the engine without hardware.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Shared control and inspection handle for a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    // A panicking test thread must not hide the state from the others.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a new mock transport: connected, console unpowered.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..MockState::default()
            })),
        }
    }

    /// Create a new mock transport with the console already powering the line.
    pub fn powered() -> Self {
        let mock = Self::new();
        mock.handle().set_power(true);
        mock
    }

    /// Return a handle sharing this transport's state.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Raise or drop the console's power signal.
    pub fn set_power(&self, on: bool) {
        lock(&self.state).power = on;
    }

    /// Make power queries fail (`true`) or succeed again (`false`).
    pub fn set_power_fault(&self, fault: bool) {
        lock(&self.state).power_fault = fault;
    }

    /// Change how subsequent `send()` calls behave.
    pub fn set_write_behavior(&self, behavior: WriteBehavior) {
        lock(&self.state).write_behavior = behavior;
    }

    /// Set the connected state.
    ///
    /// When `false`, every transport call returns [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// All writes so far, one entry per `send()` call.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    /// All bytes written so far, concatenated.
    pub fn sent_bytes(&self) -> Vec<u8> {
        lock(&self.state).sent_log.concat()
    }

    /// Return and forget the writes recorded so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut lock(&self.state).sent_log)
    }

    /// Number of times the engine flushed the port's input.
    pub fn input_flushes(&self) -> usize {
        lock(&self.state).input_flushes
    }

    /// Whether the transport is still open.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        let accepted = match state.write_behavior {
            WriteBehavior::Accept => data.len(),
            WriteBehavior::Short(max) => data.len().min(max),
            WriteBehavior::Fail => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "mock write failure",
                )));
            }
        };

        state.sent_log.push(data[..accepted].to_vec());
        Ok(accepted)
    }

    fn power_detected(&mut self) -> Result<bool> {
        let state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.power_fault {
            return Err(Error::Transport("mock modem status failure".into()));
        }
        Ok(state.power)
    }

    fn flush_input(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.input_flushes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.state).connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
