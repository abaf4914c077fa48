//! Serial port transport for the console's remote port.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for an RS-232 (or USB-serial) adapter wired to the PSP
//! remote connector, and [`SerialReader`], the receive side of the same port.
//!
//! The remote port runs at 4800 baud, 8 data bits, no parity, 1 stop bit. The
//! console signals that it is powering the link by raising 2.5 V on the
//! connector, which the usual adapter wiring presents as the RS-232 CTS input.
//!
//! # Example
//!
//! ```no_run
//! use psplink_transport::SerialTransport;
//! use psplink_core::transport::Transport;
//!
//! # async fn example() -> psplink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyS0", 4800).await?;
//! let reader = transport.take_reader().expect("reader available once");
//!
//! if transport.power_detected()? {
//!     transport.send(&[0xF0]).await?;
//! }
//! # drop(reader);
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use psplink_core::error::{Error, Result};
use psplink_core::transport::Transport;
use tokio::task::JoinHandle;
use tokio_serial::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio_util::sync::CancellationToken;

/// Default baud rate of the PSP remote port.
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// Size of the scratch buffer used by [`SerialReader`] for each read.
const READ_CHUNK: usize = 256;

/// How long a blocking read waits before re-checking for cancellation.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial port configuration.
///
/// Character framing is always 8 data bits, no parity, 1 stop bit and no
/// flow control: CTS carries the power signal, so hardware flow control would
/// stall the port whenever the console is off.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (4800 for the PSP remote port)
    pub baud_rate: u32,
    /// Modem status input that reports console power
    pub power_line: PowerLine,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            power_line: PowerLine::ClearToSend,
        }
    }
}

/// Modem status input used to detect that the console powers the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerLine {
    /// Clear To Send (the standard adapter wiring).
    ClearToSend,
    /// Data Carrier Detect.
    CarrierDetect,
    /// Data Set Ready.
    DataSetReady,
}

impl std::str::FromStr for PowerLine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cts" => Ok(PowerLine::ClearToSend),
            "dcd" | "cd" => Ok(PowerLine::CarrierDetect),
            "dsr" => Ok(PowerLine::DataSetReady),
            other => Err(Error::Transport(format!(
                "unknown power line '{other}' (expected cts, dcd or dsr)"
            ))),
        }
    }
}

/// Serial port transport for the console link.
///
/// Owns the port handle used for writes, modem-line queries and input
/// flushing. A cloned handle for the receive side is handed out once through
/// [`take_reader()`](Self::take_reader).
///
/// Writes run on tokio's blocking pool so a slow port never stalls the
/// runtime thread driving the engine.
pub struct SerialTransport {
    /// The underlying serial port
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
    /// Cloned handle for the receive pump, until claimed
    reader: Option<Mutex<Box<dyn SerialPort>>>,
    /// Input that reports console power
    power_line: PowerLine,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with the given baud rate and default settings.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyS0" on Linux, "COM1" on Windows)
    /// * `baud_rate` - Baud rate (4800 for the PSP remote port)
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            power_line = ?config.power_line,
            "Opening serial port"
        );

        let serial_port = tokio_serial::new(port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("Failed to open serial port {}: {}", port, e))
            })?;

        let reader = serial_port.try_clone().map_err(|e| {
            tracing::error!(port = %port, error = %e, "Failed to clone serial port handle");
            Error::Transport(format!("Failed to clone serial port {}: {}", port, e))
        })?;

        // Drop whatever the port buffered before we were listening.
        if let Err(e) = serial_port.clear(ClearBuffer::Input) {
            tracing::warn!(port = %port, error = %e, "Failed to flush stale input");
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened successfully");

        Ok(Self {
            port: Some(Arc::new(Mutex::new(serial_port))),
            reader: Some(Mutex::new(reader)),
            power_line: config.power_line,
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Claim the receive side of the port.
    ///
    /// Returns `None` if the reader was already taken.
    pub fn take_reader(&mut self) -> Option<SerialReader> {
        let port = self.reader.take()?.into_inner().ok()?;
        Some(SerialReader {
            port,
            port_name: self.port_name.clone(),
        })
    }

    fn port(&self) -> Result<MutexGuard<'_, Box<dyn SerialPort>>> {
        lock_port(self.port.as_ref().ok_or(Error::NotConnected)?)
    }
}

fn lock_port(port: &Mutex<Box<dyn SerialPort>>) -> Result<MutexGuard<'_, Box<dyn SerialPort>>> {
    port.lock()
        .map_err(|_| Error::Transport("serial port handle poisoned".into()))
}

/// Write `data` in one call and push it out of the port's buffers.
fn write_frame<W: Write + ?Sized>(port: &mut W, port_name: &str, data: &[u8]) -> Result<usize> {
    let written = port.write(data).map_err(|e| {
        tracing::error!(port = %port_name, error = %e, "Failed to send data");
        if e.kind() == std::io::ErrorKind::BrokenPipe
            || e.kind() == std::io::ErrorKind::NotConnected
        {
            Error::ConnectionLost
        } else {
            Error::Io(e)
        }
    })?;

    port.flush().map_err(|e| {
        tracing::error!(port = %port_name, error = %e, "Failed to flush serial port");
        Error::Io(e)
    })?;

    Ok(written)
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port = Arc::clone(self.port.as_ref().ok_or(Error::NotConnected)?);
        let port_name = self.port_name.clone();

        tracing::trace!(
            port = %port_name,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_port(&port)?;
            write_frame(&mut **guard, &port_name, &data)
        })
        .await
        .map_err(|e| Error::Transport(format!("Serial write task failed: {}", e)))?
    }

    fn power_detected(&mut self) -> Result<bool> {
        let line = self.power_line;
        let mut port = self.port()?;
        let status = match line {
            PowerLine::ClearToSend => port.read_clear_to_send(),
            PowerLine::CarrierDetect => port.read_carrier_detect(),
            PowerLine::DataSetReady => port.read_data_set_ready(),
        };
        status.map_err(|e| Error::Transport(format!("Failed to read modem status: {}", e)))
    }

    fn flush_input(&mut self) -> Result<()> {
        let port = self.port()?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| Error::Transport(format!("Failed to flush input: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Ok(mut port) = port.lock() {
                if let Err(e) = port.flush() {
                    tracing::warn!(
                        port = %self.port_name,
                        error = %e,
                        "Failed to flush before closing (continuing anyway)"
                    );
                }
            }

            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}

/// Receive side of a [`SerialTransport`].
///
/// Runs on a blocking worker thread and hands every chunk read from the port
/// to a callback, the way a SIGIO handler would. The callback must do nothing
/// but buffer the bytes: no decoding, no logging, no writes.
pub struct SerialReader {
    port: Box<dyn SerialPort>,
    port_name: String,
}

impl SerialReader {
    /// Start the receive pump on tokio's blocking pool.
    ///
    /// The pump stops when `cancel` fires, at end of stream, or on a read
    /// error other than a timeout.
    pub fn spawn<F>(self, cancel: CancellationToken, on_data: F) -> JoinHandle<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        tokio::task::spawn_blocking(move || self.run(cancel, on_data))
    }

    fn run<F>(mut self, cancel: CancellationToken, mut on_data: F)
    where
        F: FnMut(&[u8]),
    {
        let mut buf = [0u8; READ_CHUNK];

        while !cancel.is_cancelled() {
            match self.port.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(port = %self.port_name, "Serial port reached end of stream");
                    break;
                }
                Ok(n) => on_data(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(
                        port = %self.port_name,
                        error = %e,
                        "Failed to receive data"
                    );
                    break;
                }
            }
        }

        tracing::debug!(port = %self.port_name, "Serial reader stopped");
    }
}
