//! Link state machine: power, handshake, phase and ACK bookkeeping.
//!
//! [`LinkState`] holds no I/O. Each method applies one protocol event to the
//! flags and tells the caller what, if anything, must happen on the wire. The
//! engine owns the transport and the queues and performs those actions.

use bitflags::bitflags;

use crate::frame::Phase;

bitflags! {
    /// Independent link condition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LinkFlags: u8 {
        /// The console powers the line.
        const ONLINE = 0x01;
        /// Power came up during this cycle.
        const RESET = 0x02;
        /// The console asked to send a frame.
        const RTS = 0x04;
        /// The console cleared us to send a frame.
        const CTS = 0x08;
        /// A command frame is out and unacknowledged.
        const WAIT_ACK = 0x10;
    }
}

/// A change in line power seen by [`LinkState::power_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEdge {
    /// The console just started powering the line.
    Online,
    /// The console just cut power to the line.
    Offline,
}

/// What the link wants the sender to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Nothing to send, or not allowed to send.
    Idle,
    /// Ask the console for the line.
    RequestToSend,
    /// Transmit the head of the queue stamped with this phase.
    Transmit(Phase),
}

/// How an ACK from the console was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// No command was waiting for an ACK. Nothing changed.
    Unexpected,
    /// The ACK matched our outbound phase, which has been toggled.
    Accepted,
    /// The ACK carried the wrong phase. The command still counts as delivered.
    PhaseMismatch {
        /// Phase we stamped on the command.
        expected: Phase,
        /// Phase the console acknowledged.
        received: Phase,
    },
}

impl AckOutcome {
    /// Whether the head of the queue should be dropped.
    pub fn advances_queue(self) -> bool {
        !matches!(self, AckOutcome::Unexpected)
    }
}

/// Flags plus the two phase counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    flags: LinkFlags,
    inbound_phase: Phase,
    outbound_phase: Phase,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> LinkFlags {
        self.flags
    }

    pub fn is_online(&self) -> bool {
        self.flags.contains(LinkFlags::ONLINE)
    }

    /// Phase of the last command frame received from the console.
    pub fn inbound_phase(&self) -> Phase {
        self.inbound_phase
    }

    /// Phase to stamp on the next command we send.
    pub fn outbound_phase(&self) -> Phase {
        self.outbound_phase
    }

    /// Start a new cycle. RESET only lives for the cycle that set it.
    pub fn begin_cycle(&mut self) {
        self.flags.remove(LinkFlags::RESET);
    }

    /// Apply the current power reading and report an edge if there was one.
    ///
    /// Going online replaces every flag with `ONLINE | RESET`. Going offline
    /// clears every flag. The phase counters survive both.
    pub fn power_changed(&mut self, detected: bool) -> Option<PowerEdge> {
        match (detected, self.is_online()) {
            (true, false) => {
                self.flags = LinkFlags::ONLINE | LinkFlags::RESET;
                Some(PowerEdge::Online)
            }
            (false, true) => {
                self.flags = LinkFlags::empty();
                Some(PowerEdge::Offline)
            }
            _ => None,
        }
    }

    /// The console sent RTS. The caller must answer CTS right away.
    pub fn rts_received(&mut self) {
        self.flags.insert(LinkFlags::RTS);
    }

    /// The console sent CTS in answer to our RTS.
    pub fn cts_received(&mut self) {
        self.flags.insert(LinkFlags::CTS);
    }

    /// The console acknowledged a frame with the given phase.
    pub fn ack_received(&mut self, phase: Phase) -> AckOutcome {
        if !self.flags.contains(LinkFlags::WAIT_ACK) {
            return AckOutcome::Unexpected;
        }
        self.flags.remove(LinkFlags::WAIT_ACK | LinkFlags::CTS);

        if phase == self.outbound_phase {
            self.outbound_phase = self.outbound_phase.toggled();
            AckOutcome::Accepted
        } else {
            AckOutcome::PhaseMismatch {
                expected: self.outbound_phase,
                received: phase,
            }
        }
    }

    /// A command byte arrived after FRAME_START. Records its phase.
    pub fn frame_received(&mut self, command_byte: u8) -> Phase {
        self.inbound_phase = Phase::from_bit(command_byte);
        self.inbound_phase
    }

    /// We acknowledged the console's frame; it no longer holds the line.
    pub fn frame_acked(&mut self) {
        self.flags.remove(LinkFlags::RTS);
    }

    /// Decide what to transmit, given whether a command is queued.
    pub fn send_decision(&self, queued: bool) -> SendDecision {
        let blocked = LinkFlags::RTS | LinkFlags::WAIT_ACK;
        if !self.is_online() || !queued || self.flags.intersects(blocked) {
            return SendDecision::Idle;
        }
        if self.flags.contains(LinkFlags::CTS) {
            SendDecision::Transmit(self.outbound_phase)
        } else {
            SendDecision::RequestToSend
        }
    }

    /// A command frame went out in full; wait for its ACK.
    pub fn command_sent(&mut self) {
        self.flags.insert(LinkFlags::WAIT_ACK);
        self.flags.remove(LinkFlags::RTS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online() -> LinkState {
        let mut link = LinkState::new();
        link.power_changed(true);
        link.begin_cycle();
        link
    }

    // ---------------------------------------------------------------
    // Power
    // ---------------------------------------------------------------

    #[test]
    fn starts_offline() {
        let link = LinkState::new();
        assert!(!link.is_online());
        assert_eq!(link.flags(), LinkFlags::empty());
        assert_eq!(link.outbound_phase(), Phase::Zero);
    }

    #[test]
    fn online_edge_sets_reset_for_one_cycle() {
        let mut link = LinkState::new();
        assert_eq!(link.power_changed(true), Some(PowerEdge::Online));
        assert_eq!(link.flags(), LinkFlags::ONLINE | LinkFlags::RESET);

        link.begin_cycle();
        assert_eq!(link.power_changed(true), None);
        assert_eq!(link.flags(), LinkFlags::ONLINE);
    }

    #[test]
    fn online_edge_replaces_stale_flags() {
        let mut link = LinkState::new();
        link.flags = LinkFlags::CTS | LinkFlags::WAIT_ACK;
        link.power_changed(true);
        assert_eq!(link.flags(), LinkFlags::ONLINE | LinkFlags::RESET);
    }

    #[test]
    fn offline_clears_flags_but_keeps_phases() {
        let mut link = online();
        link.rts_received();
        link.cts_received();
        link.command_sent();
        link.frame_received(0x03);
        link.ack_received(Phase::Zero);
        assert_eq!(link.outbound_phase(), Phase::One);

        assert_eq!(link.power_changed(false), Some(PowerEdge::Offline));
        assert_eq!(link.flags(), LinkFlags::empty());
        assert_eq!(link.outbound_phase(), Phase::One);
        assert_eq!(link.inbound_phase(), Phase::One);

        assert_eq!(link.power_changed(false), None);
    }

    // ---------------------------------------------------------------
    // ACK handling
    // ---------------------------------------------------------------

    #[test]
    fn ack_without_pending_send_changes_nothing() {
        let mut link = online();
        link.cts_received();
        let before = link;
        assert_eq!(link.ack_received(Phase::Zero), AckOutcome::Unexpected);
        assert_eq!(link, before);
        assert!(!AckOutcome::Unexpected.advances_queue());
    }

    #[test]
    fn matching_ack_toggles_phase() {
        let mut link = online();
        link.cts_received();
        link.command_sent();

        let outcome = link.ack_received(Phase::Zero);
        assert_eq!(outcome, AckOutcome::Accepted);
        assert!(outcome.advances_queue());
        assert_eq!(link.outbound_phase(), Phase::One);
        assert!(!link.flags().intersects(LinkFlags::WAIT_ACK | LinkFlags::CTS));
    }

    #[test]
    fn mismatched_ack_keeps_phase_but_advances() {
        let mut link = online();
        link.cts_received();
        link.command_sent();

        let outcome = link.ack_received(Phase::One);
        assert_eq!(
            outcome,
            AckOutcome::PhaseMismatch {
                expected: Phase::Zero,
                received: Phase::One,
            }
        );
        assert!(outcome.advances_queue());
        assert_eq!(link.outbound_phase(), Phase::Zero);
        assert!(!link.flags().contains(LinkFlags::WAIT_ACK));
    }

    // ---------------------------------------------------------------
    // Send decisions
    // ---------------------------------------------------------------

    #[test]
    fn offline_never_sends() {
        let link = LinkState::new();
        assert_eq!(link.send_decision(true), SendDecision::Idle);
    }

    #[test]
    fn empty_queue_never_sends() {
        let link = online();
        assert_eq!(link.send_decision(false), SendDecision::Idle);
    }

    #[test]
    fn requests_line_until_cleared() {
        let mut link = online();
        assert_eq!(link.send_decision(true), SendDecision::RequestToSend);
        link.cts_received();
        assert_eq!(link.send_decision(true), SendDecision::Transmit(Phase::Zero));
    }

    #[test]
    fn console_rts_has_priority() {
        let mut link = online();
        link.cts_received();
        link.rts_received();
        assert_eq!(link.send_decision(true), SendDecision::Idle);
        link.frame_acked();
        assert_eq!(link.send_decision(true), SendDecision::Transmit(Phase::Zero));
    }

    #[test]
    fn waits_for_ack_before_next_send() {
        let mut link = online();
        link.cts_received();
        link.command_sent();
        assert_eq!(link.send_decision(true), SendDecision::Idle);

        link.ack_received(Phase::Zero);
        // CTS was consumed by the ACK, so the next command starts over.
        assert_eq!(link.send_decision(true), SendDecision::RequestToSend);
    }

    #[test]
    fn frame_received_records_inbound_phase() {
        let mut link = online();
        assert_eq!(link.frame_received(0x03), Phase::One);
        assert_eq!(link.inbound_phase(), Phase::One);
        assert_eq!(link.frame_received(0x02), Phase::Zero);
    }
}
