//! Send-side state for one connection.
//!
//! [`SendWindow`] owns the outbound byte buffer, the table of unacknowledged
//! segments and the three sequence counters.  Up to `max_window_packets`
//! segments may be in flight at once.
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `ack = K` means the peer holds every byte
//!   before `K`.
//! - Handshake control segments consume exactly one sequence number and are
//!   acknowledged by `ack == seq + 1`.
//! - On timeout the caller retransmits **every** unacked segment in ascending
//!   order (go-back-N), see [`SendWindow::retransmit_batch`].
//! - Sequence numbers are u32 and wrap; comparisons treat two values as
//!   ordered when they are less than `u32::MAX / 2` apart.
//!
//! This module only manages state; all socket I/O is the caller's job.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::Config;
use crate::error::ConnError;
use crate::packet::{Segment, MAX_PAYLOAD};
use crate::ring_buffer::RingBuffer;

// ---------------------------------------------------------------------------
// Sequence arithmetic
// ---------------------------------------------------------------------------

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub(crate) fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Returns `true` when sequence number `a` is strictly before `b`.
#[inline]
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

// ---------------------------------------------------------------------------
// Unacked
// ---------------------------------------------------------------------------

/// A transmitted segment still waiting for its acknowledgement.
#[derive(Debug, Clone)]
pub struct Unacked {
    /// Copy of the segment as last transmitted.
    pub segment: Segment,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// Retransmissions so far (the first transmission is not counted).
    pub retries: u32,
    /// Sequence space consumed: payload length, or 1 for a handshake entry.
    pub len: u32,
    /// SYN or SYN|ACK sent during the handshake.
    pub handshake: bool,
}

impl Unacked {
    fn end(&self) -> u32 {
        self.segment.header.seq.wrapping_add(self.len)
    }
}

// ---------------------------------------------------------------------------
// Fragmenter
// ---------------------------------------------------------------------------

/// Cuts the buffered byte stream into segment-sized payloads.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    mss: usize,
}

impl Fragmenter {
    /// Fails for a zero size or one the 16-bit length field cannot carry.
    pub fn new(mss: usize) -> Result<Self, ConnError> {
        if mss == 0 || mss > MAX_PAYLOAD {
            return Err(ConnError::InvalidSegmentSize(mss));
        }
        Ok(Self { mss })
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Payload length of the next segment when `buffered` bytes are waiting.
    pub fn next_len(&self, buffered: usize) -> usize {
        buffered.min(self.mss)
    }
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Outcome of a retransmission timeout.
#[derive(Debug)]
pub enum Retransmit {
    /// Nothing is in flight.
    Idle,
    /// Resend these segments, oldest first.
    Segments(Vec<Segment>),
    /// Some segment already used up its retries.
    LimitExceeded,
}

/// Send-side state of one connection.
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── buffered ───▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Sequence number for the next new segment.
    next_seq: u32,
    /// Oldest unacknowledged offset (left window edge).
    send_base: u32,
    /// Cumulative ACK we advertise for the peer's data.
    highest_ack: u32,
    buffer: RingBuffer,
    fragmenter: Fragmenter,
    max_window_packets: usize,
    unacked: VecDeque<Unacked>,
}

impl SendWindow {
    pub fn new(config: &Config) -> Result<Self, ConnError> {
        Ok(Self {
            next_seq: 0,
            send_base: 0,
            highest_ack: 0,
            buffer: RingBuffer::new(config.send_buffer_bytes),
            fragmenter: Fragmenter::new(config.max_segment_size)?,
            max_window_packets: config.max_window_packets.max(1),
            unacked: VecDeque::new(),
        })
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn highest_ack(&self) -> u32 {
        self.highest_ack
    }

    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    /// Bytes the application can still queue.
    pub fn free(&self) -> usize {
        self.buffer.free()
    }

    /// Nothing buffered and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.unacked.is_empty()
    }

    pub fn window_full(&self) -> bool {
        self.unacked.len() >= self.max_window_packets
    }

    /// `true` when the sender task can build a segment right now.
    pub fn ready(&self) -> bool {
        !self.buffer.is_empty() && !self.window_full()
    }

    /// Track a handshake SYN or SYN|ACK.  It occupies one sequence number.
    ///
    /// Returns `true` when the table went from empty to non-empty and the
    /// retransmission timer must be armed.
    pub fn track_handshake(&mut self, segment: Segment) -> bool {
        let seq = segment.header.seq;
        let arm = self.unacked.is_empty();
        self.send_base = seq;
        self.next_seq = seq.wrapping_add(1);
        self.unacked.push_back(Unacked {
            segment,
            sent_at: Instant::now(),
            retries: 0,
            len: 1,
            handshake: true,
        });
        arm
    }

    /// Drop the handshake entry and position the counters for data.
    pub fn finalize_handshake(&mut self, local_isn: u32, advertised_ack: u32) {
        self.unacked.retain(|e| !e.handshake);
        self.next_seq = local_isn.wrapping_add(1);
        self.send_base = self.next_seq;
        self.highest_ack = advertised_ack;
    }

    /// Append application bytes.  Returns how many fit.
    pub fn queue(&mut self, data: &[u8]) -> usize {
        self.buffer.write(data)
    }

    /// Cut the next data segment from the buffer and track it.
    ///
    /// Returns the segment and whether the retransmission timer must be
    /// armed, or `None` when the buffer is empty or the window is full.
    pub fn next_segment(&mut self) -> Option<(Segment, bool)> {
        if !self.ready() {
            return None;
        }
        let n = self.fragmenter.next_len(self.buffer.len());
        let payload = self.buffer.take(n);
        let segment = Segment::data(self.next_seq, self.highest_ack, 0, payload);

        let arm = self.unacked.is_empty();
        self.unacked.push_back(Unacked {
            segment: segment.clone(),
            sent_at: Instant::now(),
            retries: 0,
            len: n as u32,
            handshake: false,
        });
        self.next_seq = self.next_seq.wrapping_add(n as u32);
        Some((segment, arm))
    }

    /// Undo [`SendWindow::next_segment`] after a failed transmission.
    ///
    /// Only the newest, never-retransmitted entry can be rolled back: its
    /// payload goes back to the front of the buffer and `next_seq` rewinds,
    /// so the tracked sequence space has no gap.  Returns `false` if the
    /// entry is no longer eligible.
    pub fn rollback(&mut self, seq: u32) -> bool {
        match self.unacked.back() {
            Some(e) if e.segment.header.seq == seq && e.retries == 0 && !e.handshake => {}
            _ => return false,
        }
        if let Some(entry) = self.unacked.pop_back() {
            self.buffer.unread(&entry.segment.payload);
            self.next_seq = seq;
        }
        true
    }

    /// Process a cumulative ACK from the peer.
    ///
    /// Removes every entry fully covered by `ack`, advances `send_base`, and
    /// returns the number of entries removed.  ACKs behind `send_base` or
    /// beyond `next_seq` remove nothing.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        if !seq_le(self.send_base, ack) || !seq_le(ack, self.next_seq) {
            return 0;
        }
        self.send_base = ack;

        let mut removed = 0;
        while let Some(front) = self.unacked.front() {
            if seq_le(front.end(), ack) {
                self.unacked.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Prepare a go-back-N retransmission of everything in flight.
    ///
    /// Data entries are re-stamped with the current `highest_ack`.  Every
    /// entry's retry count goes up by one.  If any entry already reached
    /// `limit`, nothing is resent.
    pub fn retransmit_batch(&mut self, limit: u32) -> Retransmit {
        if self.unacked.is_empty() {
            return Retransmit::Idle;
        }
        if self.unacked.iter().any(|e| e.retries >= limit) {
            return Retransmit::LimitExceeded;
        }

        let now = Instant::now();
        let ack = self.highest_ack;
        let segments = self
            .unacked
            .iter_mut()
            .map(|e| {
                if !e.handshake {
                    e.segment.header.ack = ack;
                }
                e.retries += 1;
                e.sent_at = now;
                e.segment.clone()
            })
            .collect();
        Retransmit::Segments(segments)
    }

    /// Raise the advertised cumulative ACK.  Never moves it backwards.
    pub fn advance_highest_ack(&mut self, ack: u32) {
        if seq_lt(self.highest_ack, ack) {
            self.highest_ack = ack;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    fn window(mss: usize, packets: usize) -> SendWindow {
        let config = Config {
            max_segment_size: mss,
            max_window_packets: packets,
            ..Config::default()
        };
        let mut w = SendWindow::new(&config).unwrap();
        w.finalize_handshake(99, 7);
        w
    }

    fn seqs(w: &SendWindow) -> Vec<u32> {
        w.unacked.iter().map(|e| e.segment.header.seq).collect()
    }

    #[test]
    fn fragmenter_rejects_bad_sizes() {
        assert!(matches!(
            Fragmenter::new(0),
            Err(ConnError::InvalidSegmentSize(0))
        ));
        assert!(Fragmenter::new(MAX_PAYLOAD + 1).is_err());
        assert_eq!(Fragmenter::new(100).unwrap().next_len(250), 100);
        assert_eq!(Fragmenter::new(100).unwrap().next_len(30), 30);
    }

    #[test]
    fn initial_state_after_handshake() {
        let w = window(4, 8);
        assert_eq!(w.next_seq(), 100);
        assert_eq!(w.send_base(), 100);
        assert_eq!(w.highest_ack(), 7);
        assert!(!w.ready());
        assert!(w.is_drained());
    }

    #[test]
    fn segments_are_cut_at_mss_and_piggyback_ack() {
        let mut w = window(4, 8);
        assert_eq!(w.queue(b"abcdefghij"), 10);

        let (s1, arm1) = w.next_segment().unwrap();
        let (s2, arm2) = w.next_segment().unwrap();
        let (s3, arm3) = w.next_segment().unwrap();
        assert!(w.next_segment().is_none());

        assert_eq!((s1.header.seq, s1.payload.as_slice()), (100, &b"abcd"[..]));
        assert_eq!((s2.header.seq, s2.payload.as_slice()), (104, &b"efgh"[..]));
        assert_eq!((s3.header.seq, s3.payload.as_slice()), (108, &b"ij"[..]));
        assert_eq!(s1.header.ack, 7);
        assert!(s1.has(flags::ACK));
        // only the empty -> non-empty transition arms the timer
        assert!(arm1 && !arm2 && !arm3);
        assert_eq!(w.next_seq(), 110);
    }

    #[test]
    fn window_full_blocks_segmentation() {
        let mut w = window(4, 2);
        w.queue(&[0u8; 12]);
        assert!(w.next_segment().is_some());
        assert!(w.next_segment().is_some());
        assert!(w.window_full());
        assert!(w.next_segment().is_none());

        w.on_ack(104);
        assert!(w.next_segment().is_some());
    }

    #[test]
    fn cumulative_ack_slides_multiple() {
        let mut w = window(5, 8);
        w.queue(&[0u8; 15]);
        while w.next_segment().is_some() {}

        assert_eq!(w.on_ack(110), 2);
        assert_eq!(w.send_base(), 110);
        assert_eq!(seqs(&w), vec![110]);
        assert_eq!(w.on_ack(115), 1);
        assert!(w.is_drained());
    }

    #[test]
    fn duplicate_and_spurious_acks_remove_nothing() {
        let mut w = window(5, 8);
        w.queue(&[0u8; 5]);
        w.next_segment();

        assert_eq!(w.on_ack(100), 0);
        assert_eq!(w.on_ack(1000), 0);
        assert_eq!(w.send_base(), 100);
        assert_eq!(w.on_ack(105), 1);
        assert_eq!(w.on_ack(105), 0);
        assert_eq!(w.on_ack(100), 0);
    }

    #[test]
    fn partial_ack_keeps_segment() {
        let mut w = window(10, 8);
        w.queue(&[0u8; 10]);
        w.next_segment();
        assert_eq!(w.on_ack(104), 0);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn handshake_entry_acked_by_seq_plus_one() {
        let mut w = SendWindow::new(&Config::default()).unwrap();
        let arm = w.track_handshake(Segment::control(flags::SYN, 500, 0, 0));
        assert!(arm);
        assert_eq!(w.on_ack(500), 0);
        assert_eq!(w.on_ack(501), 1);
        assert!(!w.has_unacked());
    }

    #[test]
    fn finalize_handshake_drops_control_entry() {
        let mut w = SendWindow::new(&Config::default()).unwrap();
        w.track_handshake(Segment::control(flags::SYN | flags::ACK, 41, 9, 0));
        w.finalize_handshake(41, 9);
        assert!(!w.has_unacked());
        assert_eq!(w.next_seq(), 42);
        assert_eq!(w.highest_ack(), 9);
    }

    #[test]
    fn rollback_restores_buffer_and_counter() {
        let mut w = window(4, 8);
        w.queue(b"abcdef");
        let (s1, _) = w.next_segment().unwrap();
        assert!(w.rollback(s1.header.seq));
        assert_eq!(w.next_seq(), 100);
        assert!(!w.has_unacked());

        let (again, _) = w.next_segment().unwrap();
        assert_eq!(again.payload, b"abcd");
        assert_eq!(again.header.seq, 100);
    }

    #[test]
    fn rollback_refuses_retransmitted_entry() {
        let mut w = window(4, 8);
        w.queue(b"abcd");
        let (s, _) = w.next_segment().unwrap();
        w.retransmit_batch(8);
        assert!(!w.rollback(s.header.seq));
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn retransmit_restamps_ack_in_order() {
        let mut w = window(2, 8);
        w.queue(b"aabbcc");
        while w.next_segment().is_some() {}
        w.advance_highest_ack(50);

        let Retransmit::Segments(segs) = w.retransmit_batch(8) else {
            panic!("expected a batch");
        };
        let order: Vec<u32> = segs.iter().map(|s| s.header.seq).collect();
        assert_eq!(order, vec![100, 102, 104]);
        assert!(segs.iter().all(|s| s.header.ack == 50));
        assert!(w.unacked.iter().all(|e| e.retries == 1));
    }

    #[test]
    fn retransmit_limit_checked_before_resend() {
        let mut w = window(4, 8);
        w.queue(b"abcd");
        w.next_segment();
        for _ in 0..3 {
            assert!(matches!(w.retransmit_batch(3), Retransmit::Segments(_)));
        }
        assert!(matches!(w.retransmit_batch(3), Retransmit::LimitExceeded));
    }

    #[test]
    fn retransmit_idle_when_empty() {
        let mut w = window(4, 8);
        assert!(matches!(w.retransmit_batch(3), Retransmit::Idle));
    }

    #[test]
    fn highest_ack_never_regresses() {
        let mut w = window(4, 8);
        w.advance_highest_ack(20);
        w.advance_highest_ack(10);
        assert_eq!(w.highest_ack(), 20);
    }

    #[test]
    fn seq_wrap_around() {
        let mut w = window(10, 8);
        let start = u32::MAX - 5;
        w.finalize_handshake(start.wrapping_sub(1), 0);
        w.queue(&[0u8; 10]);
        let (s, _) = w.next_segment().unwrap();
        assert_eq!(s.header.seq, start);

        let expected_ack = start.wrapping_add(10);
        assert_eq!(w.on_ack(expected_ack), 1);
        assert_eq!(w.send_base(), expected_ack);
    }

    #[test]
    fn seq_compare_helpers() {
        assert!(seq_le(5, 5));
        assert!(!seq_lt(5, 5));
        assert!(seq_lt(u32::MAX, 0));
        assert!(!seq_lt(0, u32::MAX));
    }
}
