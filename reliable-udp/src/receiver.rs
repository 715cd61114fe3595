//! Receive-side state for one connection.
//!
//! [`ReceiveWindow`] accepts data segments in any order and delivers their
//! bytes to the application buffer strictly in sequence order:
//!
//! - A segment at the expected offset is written straight to the buffer,
//!   followed by any contiguous run already waiting in the out-of-order table.
//! - A segment ahead of the expected offset is parked in the out-of-order
//!   table while there is room for it.
//! - A segment entirely behind the expected offset is a duplicate and is
//!   dropped.  One that straddles it has its new tail delivered.
//!
//! Every data segment, accepted or not, leaves an ACK owed to the peer; the
//! caller collects it with [`ReceiveWindow::take_ack`].
//!
//! This module only manages state; all socket I/O is the caller's job.

use std::collections::BTreeMap;

use crate::ring_buffer::RingBuffer;
use crate::sender::{seq_le, seq_lt};

/// Receive-side state of one connection.
#[derive(Debug)]
pub struct ReceiveWindow {
    /// Next in-order offset expected from the peer.
    expected: u32,
    /// In-order bytes waiting for the application.
    buffer: RingBuffer,
    /// Segments that arrived ahead of `expected`, keyed by their `seq`.
    out_of_order: BTreeMap<u32, Vec<u8>>,
    /// Total payload bytes parked in `out_of_order`.
    ooo_bytes: usize,
    ack_pending: bool,
}

impl ReceiveWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            expected: 0,
            buffer: RingBuffer::new(capacity),
            out_of_order: BTreeMap::new(),
            ooo_bytes: 0,
            ack_pending: false,
        }
    }

    /// Position the window after the peer's SYN, which consumes one offset.
    pub fn start(&mut self, remote_isn: u32) {
        self.expected = remote_isn.wrapping_add(1);
    }

    /// Cumulative ACK for the next outbound segment.
    pub fn ack_number(&self) -> u32 {
        self.expected
    }

    /// Free receive capacity, saturated to the 16-bit window field.
    pub fn window_size(&self) -> u16 {
        self.buffer.free().min(u16::MAX as usize) as u16
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn out_of_order_len(&self) -> usize {
        self.out_of_order.len()
    }

    /// Copy in-order bytes into `out`.  Returns the number copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.buffer.read(out)
    }

    /// Clear the pending-ACK flag, returning whether one was owed.
    pub fn take_ack(&mut self) -> bool {
        std::mem::replace(&mut self.ack_pending, false)
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Process one data segment.
    ///
    /// Returns the number of bytes newly delivered to the application
    /// buffer, including any out-of-order run it unlocked.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> usize {
        if payload.is_empty() {
            return 0;
        }
        self.ack_pending = true;

        let end = seq.wrapping_add(payload.len() as u32);
        if seq_le(end, self.expected) {
            return 0;
        }

        let data = if seq_lt(seq, self.expected) {
            &payload[self.expected.wrapping_sub(seq) as usize..]
        } else if seq == self.expected {
            payload
        } else {
            self.park(seq, payload);
            return 0;
        };

        if self.buffer.free() < data.len() {
            return 0;
        }
        self.buffer.write(data);
        self.expected = self.expected.wrapping_add(data.len() as u32);
        data.len() + self.drain()
    }

    fn park(&mut self, seq: u32, payload: &[u8]) {
        if self.out_of_order.contains_key(&seq) {
            return;
        }
        let room = self.buffer.free().saturating_sub(self.ooo_bytes);
        if payload.len() > room {
            return;
        }
        self.ooo_bytes += payload.len();
        self.out_of_order.insert(seq, payload.to_vec());
    }

    /// The parked key closest to `expected` from behind (inclusive), if any.
    ///
    /// Looks at the largest key numerically at or below `expected`, then at
    /// the largest key overall for entries sitting behind `expected` across
    /// the `u32` wrap.
    fn nearest_at_or_before(&self, expected: u32) -> Option<u32> {
        let below = self.out_of_order.range(..=expected).next_back();
        let wrapped = self.out_of_order.range(expected..).next_back();
        below
            .into_iter()
            .chain(wrapped)
            .map(|(&k, _)| k)
            .find(|&k| seq_le(k, expected))
    }

    /// Move every parked segment that now touches `expected` into the buffer.
    fn drain(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let expected = self.expected;
            let Some(key) = self.nearest_at_or_before(expected) else {
                break;
            };
            let Some(payload) = self.out_of_order.remove(&key) else {
                break;
            };
            self.ooo_bytes -= payload.len();

            let skip = expected.wrapping_sub(key) as usize;
            if skip >= payload.len() {
                continue;
            }
            let tail = &payload[skip..];
            if self.buffer.free() < tail.len() {
                self.ooo_bytes += payload.len();
                self.out_of_order.insert(key, payload);
                break;
            }
            self.buffer.write(tail);
            self.expected = self.expected.wrapping_add(tail.len() as u32);
            delivered += tail.len();
        }
        delivered
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
