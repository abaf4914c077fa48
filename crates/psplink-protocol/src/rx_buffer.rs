//! Lock-free single-producer/single-consumer ring for received bytes.
//!
//! The receive side of the serial port runs on its own thread and must never
//! wait on the protocol engine. It owns the [`RxProducer`] and pushes bytes as
//! they arrive; the engine owns the [`RxConsumer`] and drains it once per poll.
//!
//! Both cursors only ever increase (wrapping at `usize::MAX`) and the slot index
//! is the cursor masked to the capacity, which is therefore a power of two.
//! `tail - head` is the number of unread bytes. When the ring is full the
//! producer drops the incoming byte and records it; the consumer learns about
//! it through [`RxConsumer::take_overflow`]. No data is ever overwritten in
//! place, so the consumer never reads a torn slot.
//!
//! With the `loom` feature the atomics come from loom and the model tests in
//! this module explore every interleaving. Run them on their own:
//!
//! ```bash
//! cargo test -p psplink-protocol --features loom -- loom
//! ```

use std::fmt;

mod sync {
    #[cfg(feature = "loom")]
    pub(super) use loom::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    #[cfg(feature = "loom")]
    pub(super) use loom::sync::Arc;

    #[cfg(not(feature = "loom"))]
    pub(super) use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    #[cfg(not(feature = "loom"))]
    pub(super) use std::sync::Arc;
}

use sync::{Arc, AtomicU8, AtomicUsize, Ordering};

/// Default receive ring size in bytes.
pub const DEFAULT_RX_CAPACITY: usize = 256;

struct Ring {
    slots: Box<[AtomicU8]>,
    mask: usize,
    /// Next slot to read. Written by the consumer only.
    head: AtomicUsize,
    /// Next slot to write. Written by the producer only.
    tail: AtomicUsize,
    /// Bytes dropped because the ring was full, since last taken.
    dropped: AtomicUsize,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Create a receive ring and split it into its two ends.
///
/// `capacity` is rounded up to the next power of two (minimum 2).
///
/// # Example
///
/// ```
/// use psplink_protocol::rx_buffer::rx_buffer;
///
/// let (mut tx, mut rx) = rx_buffer(4);
/// assert_eq!(tx.push_slice(&[0xF0, 0xF8]), 2);
/// assert_eq!(rx.pop(), Some(0xF0));
/// assert_eq!(rx.len(), 1);
/// ```
pub fn rx_buffer(capacity: usize) -> (RxProducer, RxConsumer) {
    let capacity = capacity.max(2).next_power_of_two();
    let slots: Box<[AtomicU8]> = (0..capacity).map(|_| AtomicU8::new(0)).collect();
    let ring = Arc::new(Ring {
        slots,
        mask: capacity - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        dropped: AtomicUsize::new(0),
    });
    (
        RxProducer {
            ring: Arc::clone(&ring),
        },
        RxConsumer { ring },
    )
}

/// Writing end of the receive ring. Never blocks.
pub struct RxProducer {
    ring: Arc<Ring>,
}

impl RxProducer {
    /// Append one byte. Returns `false` and records an overflow if full.
    pub fn push(&mut self, byte: u8) -> bool {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= ring.capacity() {
            ring.dropped.fetch_add(1, Ordering::Release);
            return false;
        }
        ring.slots[tail & ring.mask].store(byte, Ordering::Relaxed);
        ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Append as many bytes as fit. Returns the number accepted.
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().filter(|&&b| self.push(b)).count()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl fmt::Debug for RxProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxProducer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Reading end of the receive ring.
pub struct RxConsumer {
    ring: Arc<Ring>,
}

impl RxConsumer {
    /// Take the oldest unread byte.
    pub fn pop(&mut self) -> Option<u8> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let byte = ring.slots[head & ring.mask].load(Ordering::Relaxed);
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Discard every unread byte.
    pub fn clear(&mut self) {
        let tail = self.ring.tail.load(Ordering::Acquire);
        self.ring.head.store(tail, Ordering::Release);
    }

    /// Whether bytes have been dropped since the last [`take_overflow`](Self::take_overflow).
    pub fn overflowed(&self) -> bool {
        self.ring.dropped.load(Ordering::Acquire) != 0
    }

    /// Return and reset the number of bytes dropped because the ring was full.
    pub fn take_overflow(&mut self) -> usize {
        self.ring.dropped.swap(0, Ordering::AcqRel)
    }
}

impl fmt::Debug for RxConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxConsumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
