//! Bounded FIFO of commands waiting to be sent to the console.
//!
//! The head of the queue is the oldest command not yet acknowledged. The
//! sender peeks at it, transmits it, and only [`CommandQueue::advance`]s once
//! the console ACKs, so a lost frame is simply sent again.
//!
//! Once the head has gone out on the wire it is in flight and overflow never
//! evicts it: the ACK that eventually arrives must retire that command and
//! not the one behind it.

use std::collections::VecDeque;

use psplink_core::{Error, Result};

use crate::command::Command;

/// Default number of commands the queue holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// What [`CommandQueue::push`] does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the oldest unsent command to make room.
    #[default]
    Overwrite,
    /// Refuse the new command with [`Error::QueueFull`].
    Reject,
}

/// Outcome of a successful [`CommandQueue::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pushed {
    /// The command was appended.
    Queued,
    /// A command was dropped to make room. Normally the oldest unsent entry;
    /// the new command itself when the only slot holds the in-flight head.
    Overwrote(Command),
}

/// Ring of pending outbound commands.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    entries: VecDeque<Command>,
    capacity: usize,
    policy: OverflowPolicy,
    /// The head has been transmitted and awaits its ACK.
    in_flight: bool,
}

impl CommandQueue {
    /// Create an empty queue. A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        CommandQueue {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            in_flight: false,
        }
    }

    /// Append a command at the tail.
    pub fn push(&mut self, command: Command) -> Result<Pushed> {
        if self.entries.len() < self.capacity {
            self.entries.push_back(command);
            return Ok(Pushed::Queued);
        }

        match self.policy {
            OverflowPolicy::Reject => Err(Error::QueueFull {
                capacity: self.capacity,
            }),
            OverflowPolicy::Overwrite => {
                let oldest_unsent = usize::from(self.in_flight);
                match self.entries.remove(oldest_unsent) {
                    Some(old) => {
                        self.entries.push_back(command);
                        Ok(Pushed::Overwrote(old))
                    }
                    // A single slot holding the in-flight head.
                    None => Ok(Pushed::Overwrote(command)),
                }
            }
        }
    }

    /// Parse a hex payload and append the resulting command.
    ///
    /// A malformed payload leaves the queue untouched.
    pub fn enqueue(&mut self, code: u8, hex: &str) -> Result<Pushed> {
        let command = Command::parse(code, hex)?;
        self.push(command)
    }

    /// The oldest unacknowledged command.
    pub fn peek_head(&self) -> Option<&Command> {
        self.entries.front()
    }

    /// Record that the head went out and is waiting for its ACK.
    pub fn mark_in_flight(&mut self) {
        self.in_flight = !self.entries.is_empty();
    }

    /// Whether the head has been transmitted and not yet acknowledged.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Drop the head after the console acknowledged it.
    pub fn advance(&mut self) -> Option<Command> {
        self.in_flight = false;
        self.entries.pop_front()
    }

    /// Drop every pending command.
    pub fn clear(&mut self) {
        self.in_flight = false;
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Iterate from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.entries.iter()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        CommandQueue::new(DEFAULT_QUEUE_CAPACITY, OverflowPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CMD_ID, CMD_INIT, CMD_KEYS};
    use psplink_core::PayloadError;

    #[test]
    fn fifo_order() {
        let mut q = CommandQueue::default();
        q.push(Command::init()).unwrap();
        q.push(Command::id()).unwrap();

        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_head().unwrap().code(), CMD_INIT);
        assert_eq!(q.advance().unwrap().code(), CMD_INIT);
        assert_eq!(q.peek_head().unwrap().code(), CMD_ID);
        q.advance();
        assert!(q.is_empty());
        assert!(q.peek_head().is_none());
        assert!(q.advance().is_none());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = CommandQueue::default();
        q.push(Command::keys_released()).unwrap();
        assert!(q.peek_head().is_some());
        assert!(q.peek_head().is_some());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn enqueue_parses_payload() {
        let mut q = CommandQueue::default();
        q.enqueue(CMD_KEYS, "00 00").unwrap();
        assert_eq!(q.peek_head().unwrap().payload(), &[0x00, 0x00]);
    }

    #[test]
    fn malformed_enqueue_leaves_queue_unchanged() {
        let mut q = CommandQueue::default();
        q.push(Command::init()).unwrap();

        let err = q.enqueue(CMD_INIT, "01 01 01 ").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidPayload(PayloadError::Length(_))
        ));
        assert!(q.enqueue(CMD_INIT, "0").is_err());

        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_head(), Some(&Command::init()));
    }

    #[test]
    fn full_queue_overwrites_oldest_by_default() {
        let mut q = CommandQueue::default();
        for n in 0..DEFAULT_QUEUE_CAPACITY {
            assert_eq!(q.push(Command::keys(n as u16)).unwrap(), Pushed::Queued);
        }

        let pushed = q.push(Command::keys(0xFFFF)).unwrap();
        assert_eq!(pushed, Pushed::Overwrote(Command::keys(0)));
        assert_eq!(q.len(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(q.peek_head(), Some(&Command::keys(1)));
        assert_eq!(q.iter().last(), Some(&Command::keys(0xFFFF)));
    }

    #[test]
    fn overwrite_spares_in_flight_head() {
        let mut q = CommandQueue::new(3, OverflowPolicy::Overwrite);
        q.push(Command::init()).unwrap();
        q.push(Command::id()).unwrap();
        q.mark_in_flight();
        q.push(Command::keys(1)).unwrap();

        let pushed = q.push(Command::keys(2)).unwrap();
        assert_eq!(pushed, Pushed::Overwrote(Command::id()));
        assert_eq!(q.peek_head(), Some(&Command::init()));
        assert!(q.is_in_flight());

        assert_eq!(q.advance(), Some(Command::init()));
        assert!(!q.is_in_flight());
        assert_eq!(q.peek_head(), Some(&Command::keys(1)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn single_slot_in_flight_drops_new_command() {
        let mut q = CommandQueue::new(1, OverflowPolicy::Overwrite);
        q.push(Command::init()).unwrap();
        q.mark_in_flight();

        let pushed = q.push(Command::keys(1)).unwrap();
        assert_eq!(pushed, Pushed::Overwrote(Command::keys(1)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_head(), Some(&Command::init()));
    }

    #[test]
    fn clear_forgets_in_flight() {
        let mut q = CommandQueue::default();
        q.mark_in_flight();
        assert!(!q.is_in_flight());

        q.push(Command::init()).unwrap();
        q.mark_in_flight();
        q.clear();
        assert!(!q.is_in_flight());
    }

    #[test]
    fn full_queue_rejects_in_strict_mode() {
        let mut q = CommandQueue::new(2, OverflowPolicy::Reject);
        q.push(Command::init()).unwrap();
        q.push(Command::id()).unwrap();

        let err = q.push(Command::keys_released()).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_head(), Some(&Command::init()));
    }

    #[test]
    fn clear_empties() {
        let mut q = CommandQueue::default();
        q.push(Command::init()).unwrap();
        q.push(Command::id()).unwrap();
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn zero_capacity_holds_one() {
        let q = CommandQueue::new(0, OverflowPolicy::Reject);
        assert_eq!(q.capacity(), 1);
        assert_eq!(q.policy(), OverflowPolicy::Reject);
    }
}
