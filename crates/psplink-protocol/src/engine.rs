//! The protocol engine: one poll cycle per call.
//!
//! [`ProtocolEngine`] owns the transport, the receive ring consumer, the
//! command queue and the link state. The host calls [`ProtocolEngine::poll`]
//! in a tight loop. Each cycle:
//!
//! 1. reads the power line and handles online/offline edges,
//! 2. drains every received byte through the link state machine,
//! 3. sends at most one thing (RTS or the head command frame).
//!
//! Nothing on the wire is fatal. Desyncs, truncated frames and failed writes
//! are logged through `tracing` and published as [`LinkEvent`]s, and the next
//! cycle carries on from whatever state is left. A failed frame write leaves
//! the command at the head of the queue, so it goes out again next cycle.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use psplink_core::error::{Error, Result};
use psplink_core::events::LinkEvent;
use psplink_core::transport::Transport;

use crate::command::Command;
use crate::frame::{
    self, Marker, Phase, CMD_QUERY, CTS, FRAME_STOP, MAX_PAYLOAD, PHASE_MASK, QUERY_SENTINEL, RTS,
};
use crate::link::{AckOutcome, LinkState, PowerEdge, SendDecision};
use crate::queue::{CommandQueue, OverflowPolicy, Pushed, DEFAULT_QUEUE_CAPACITY};
use crate::rx_buffer::{RxConsumer, DEFAULT_RX_CAPACITY};

const BYTE_MICROS: u64 = 2084;

/// Time one byte takes on the wire at 4800 baud, 8N1.
pub const BYTE_TIME: Duration = Duration::from_micros(BYTE_MICROS);

/// Default wait for a frame byte that has not arrived yet: one full frame.
pub const DEFAULT_FRAME_WAIT: Duration = Duration::from_micros(BYTE_MICROS * MAX_PAYLOAD as u64);

/// Default number of bytes scanned for the stop marker of an unknown frame.
pub const DEFAULT_SCAN_LIMIT: usize = MAX_PAYLOAD + 2;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for [`ProtocolEngine`]. Built by [`EngineBuilder`](crate::builder::EngineBuilder).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait, at most once per frame, for bytes that are not there yet.
    pub frame_wait: Duration,
    /// Bytes to scan for FRAME_STOP when skipping an unknown command.
    pub scan_limit: usize,
    /// Command queue size.
    pub queue_capacity: usize,
    /// What to do when the command queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Receive ring size (rounded up to a power of two).
    pub rx_capacity: usize,
    /// Event channel size.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            frame_wait: DEFAULT_FRAME_WAIT,
            scan_limit: DEFAULT_SCAN_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::Overwrite,
            rx_capacity: DEFAULT_RX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Background task feeding the receive ring from the port.
pub(crate) struct ReceivePump {
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Drives the PSP remote-port protocol over a [`Transport`].
pub struct ProtocolEngine {
    transport: Box<dyn Transport>,
    rx: RxConsumer,
    queue: CommandQueue,
    link: LinkState,
    config: EngineConfig,
    event_tx: broadcast::Sender<LinkEvent>,
    started: Instant,
    /// Set while power queries fail, so the failure is reported once.
    power_fault: bool,
    /// The current inbound frame has already used its one wait.
    frame_wait_spent: bool,
    pump: Option<ReceivePump>,
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.cancel.cancel();
        }
    }
}

impl ProtocolEngine {
    /// Create an engine around a transport and the consuming end of its
    /// receive ring.
    ///
    /// Prefer [`EngineBuilder`](crate::builder::EngineBuilder), which also
    /// creates the ring and validates the configuration.
    pub fn new(transport: Box<dyn Transport>, rx: RxConsumer, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        ProtocolEngine {
            transport,
            rx,
            queue: CommandQueue::new(config.queue_capacity, config.overflow_policy),
            link: LinkState::new(),
            config,
            event_tx,
            started: Instant::now(),
            power_fault: false,
            frame_wait_spent: false,
            pump: None,
        }
    }

    pub(crate) fn attach_pump(&mut self, pump: ReceivePump) {
        self.pump = Some(pump);
    }

    /// Subscribe to log, command and status events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Current link flags and phases.
    pub fn link(&self) -> &LinkState {
        &self.link
    }

    /// Pending outbound commands.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.link.is_online()
    }

    /// Queue a command given as a `"xx xx .. xx"` hex payload.
    ///
    /// A malformed payload is rejected and nothing is queued. With the
    /// default [`OverflowPolicy::Overwrite`] a full queue drops its oldest
    /// entry; with [`OverflowPolicy::Reject`] this returns
    /// [`Error::QueueFull`].
    pub fn enqueue(&mut self, code: u8, payload: &str) -> Result<()> {
        let command = match Command::parse(code, payload) {
            Ok(command) => command,
            Err(e) => {
                self.desync(format!("Rejected command {code:02X}: {e}"));
                return Err(e.into());
            }
        };
        self.enqueue_command(command)
    }

    /// Queue an already-built command.
    pub fn enqueue_command(&mut self, command: Command) -> Result<()> {
        debug!(command = %command, "Enqueue command");
        match self.queue.push(command) {
            Ok(Pushed::Queued) => Ok(()),
            Ok(Pushed::Overwrote(old)) => {
                self.desync(format!("Command queue full, dropped {old}"));
                Ok(())
            }
            Err(e) => {
                self.desync(format!("Command rejected: {e}"));
                Err(e)
            }
        }
    }

    /// Run one protocol cycle.
    ///
    /// Returns [`Error::NotConnected`] once the transport has been closed.
    /// Every other problem is logged and the cycle continues.
    pub async fn poll(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        self.link.begin_cycle();
        self.check_power();
        if !self.link.is_online() {
            return Ok(());
        }

        self.read_inbound().await;
        self.write_outbound().await;
        Ok(())
    }

    /// Stop the receive pump and close the transport.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            if let Err(e) = pump.task.await {
                warn!(error = %e, "Receive pump ended abnormally");
            }
        }
        self.transport.close().await
    }

    // -----------------------------------------------------------------
    // Power
    // -----------------------------------------------------------------

    fn check_power(&mut self) {
        let detected = match self.transport.power_detected() {
            Ok(detected) => {
                if self.power_fault {
                    self.power_fault = false;
                    self.note("Line status readable again");
                }
                detected
            }
            Err(e) => {
                if !self.power_fault {
                    self.power_fault = true;
                    self.fault(format!("Error reading line status: {e}"));
                }
                return;
            }
        };

        match self.link.power_changed(detected) {
            Some(PowerEdge::Online) => self.went_online(),
            Some(PowerEdge::Offline) => self.went_offline(),
            None => {}
        }
    }

    fn went_online(&mut self) {
        info!("PSP serial port online");
        self.emit(|at| LinkEvent::Status { at, online: true });

        self.rx.clear();
        self.rx.take_overflow();
        self.queue.clear();

        for command in [Command::init(), Command::id()] {
            // Only a one-slot strict queue can refuse these; that is reported.
            let _ = self.enqueue_command(command);
        }
    }

    fn went_offline(&mut self) {
        info!("PSP serial port offline");
        if let Err(e) = self.transport.flush_input() {
            self.fault(format!("Error flushing serial input: {e}"));
        }
        self.emit(|at| LinkEvent::Status { at, online: false });
    }

    // -----------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------

    async fn read_inbound(&mut self) {
        let dropped = self.rx.take_overflow();
        if dropped > 0 {
            self.desync(format!("Receive buffer overflow, {dropped} bytes lost"));
        }

        while let Some(byte) = self.rx.pop() {
            trace!(byte = format_args!("{byte:02X}"), "Received byte");
            match frame::decode_marker(byte) {
                Marker::Rts => {
                    self.note("Received: FRAME_RTS");
                    self.link.rts_received();
                    self.transmit(&[CTS], "CTS").await;
                }
                Marker::Cts => {
                    self.note("Received: FRAME_CTS");
                    self.link.cts_received();
                }
                Marker::Ack(phase) => self.handle_ack(phase),
                Marker::FrameStart => {
                    if !self.handle_frame().await {
                        break;
                    }
                }
                Marker::FrameStop | Marker::Unrecognized(_) => {
                    self.note(format!("Unknown Frame: {byte:02X}"));
                }
            }
        }
    }

    fn handle_ack(&mut self, phase: Phase) {
        self.note("Received FRAME_ACK");
        let outcome = self.link.ack_received(phase);
        match outcome {
            AckOutcome::Unexpected => self.desync("Received ACK while not waiting for ACK"),
            AckOutcome::Accepted => {}
            AckOutcome::PhaseMismatch { expected, received } => self.desync(format!(
                "ACK phase {received} does not match our outbound phase {expected}"
            )),
        }
        if outcome.advances_queue() {
            if let Some(done) = self.queue.advance() {
                debug!(command = %done, "Command acknowledged");
            }
        }
    }

    /// Handle a frame after its FRAME_START. Returns `false` when the cycle
    /// should stop reading.
    async fn handle_frame(&mut self) -> bool {
        self.note("FRAME_START");
        self.frame_wait_spent = false;
        let command = match self.rx.pop() {
            Some(b) => b,
            None => {
                self.desync("FRAME_START but no command, trying again");
                match self.next_frame_byte().await {
                    Some(b) => b,
                    None => {
                        self.desync("Frame start but no command");
                        return false;
                    }
                }
            }
        };

        let phase = self.link.frame_received(command);
        let label = frame::command_label(command);
        self.emit(|at| LinkEvent::CommandReceived { at, label });

        match command & !PHASE_MASK {
            CMD_QUERY => self.handle_query().await,
            code => self.skip_frame(code).await,
        }

        self.transmit(&[frame::encode_ack(phase)], "ACK").await;
        self.link.frame_acked();
        true
    }

    async fn handle_query(&mut self) {
        let Some(first) = self.next_frame_byte().await else {
            self.desync("QUERY frame truncated");
            return;
        };
        self.note(format!("Received CMD_QUERY: {first:02X}"));
        if first == QUERY_SENTINEL {
            self.note("enqueue CMD_KEYS");
            let _ = self.enqueue_command(Command::keys_released());
        }

        // Checksum, not verified.
        if self.next_frame_byte().await.is_none() {
            self.desync("QUERY frame truncated");
            return;
        }
        match self.next_frame_byte().await {
            Some(FRAME_STOP) => {}
            Some(other) => self.desync(format!("Missing FE frame end, got {other:02X}")),
            None => self.desync("Missing FE frame end"),
        }
    }

    async fn skip_frame(&mut self, code: u8) {
        self.note(format!("Received UNKNOWN COMMAND {code:02X}"));
        for _ in 0..self.config.scan_limit {
            match self.next_frame_byte().await {
                Some(FRAME_STOP) => return,
                Some(_) => {}
                None => {
                    self.desync(format!("Command {code:02X} truncated before frame end"));
                    return;
                }
            }
        }
        self.desync(format!(
            "No frame end within {} bytes of command {code:02X}",
            self.config.scan_limit
        ));
    }

    /// Next byte inside a frame. Waits for it only if this frame has not
    /// waited before, so one frame never stalls a cycle for more than
    /// `frame_wait`.
    async fn next_frame_byte(&mut self) -> Option<u8> {
        if let Some(b) = self.rx.pop() {
            return Some(b);
        }
        if self.frame_wait_spent {
            return None;
        }
        self.frame_wait_spent = true;
        trace!(wait = ?self.config.frame_wait, "Waiting for frame byte");
        tokio::time::sleep(self.config.frame_wait).await;
        self.rx.pop()
    }

    // -----------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------

    async fn write_outbound(&mut self) {
        match self.link.send_decision(!self.queue.is_empty()) {
            SendDecision::Idle => {}
            SendDecision::RequestToSend => {
                self.transmit(&[RTS], "RTS").await;
            }
            SendDecision::Transmit(phase) => {
                let Some(command) = self.queue.peek_head() else {
                    return;
                };
                let code = command.code();
                let bytes = frame::encode_command(command, phase);

                self.note(format!("Sending command {code:02X}"));
                if self.transmit(&bytes, "frame").await {
                    self.link.command_sent();
                    self.queue.mark_in_flight();
                    let label = frame::command_label(code);
                    self.emit(|at| LinkEvent::CommandSent { at, label });
                }
            }
        }
    }

    /// Write all of `bytes`. Short and failed writes are reported and return `false`.
    async fn transmit(&mut self, bytes: &[u8], what: &str) -> bool {
        trace!(data = ?bytes, what, "Transmit");
        match self.transport.send(bytes).await {
            Ok(n) if n == bytes.len() => true,
            Ok(n) => {
                self.fault(format!(
                    "Error sending {what}: wrote {n} of {} bytes",
                    bytes.len()
                ));
                false
            }
            Err(e) => {
                self.fault(format!("Error sending {what}: {e}"));
                false
            }
        }
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    fn emit(&self, event: impl FnOnce(Duration) -> LinkEvent) {
        let _ = self.event_tx.send(event(self.started.elapsed()));
    }

    fn note(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{message}");
        self.emit(|at| LinkEvent::Log { at, message });
    }

    fn desync(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.emit(|at| LinkEvent::Error { at, message });
    }

    fn fault(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.emit(|at| LinkEvent::Error { at, message });
    }
}
