//! Transport tuning parameters.
//!
//! A [`Config`] is a plain record.  Build one with struct-update syntax over
//! [`Config::default`] and let [`Config::normalize`] repair the rest: zero
//! fields fall back to the protocol defaults and every value is clamped into
//! a safe range.  Connections and listeners always normalize the config they
//! are given, so callers never have to.

use std::time::Duration;

/// Default maximum payload bytes per segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 1187;
/// Default in-flight segment cap.
pub const DEFAULT_WINDOW_PACKETS: usize = 1024;
/// Default base retransmission interval.
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(200);
/// Default ceiling for the backed-off retransmission interval.
pub const DEFAULT_MAX_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(4);
/// Default number of retransmissions before the connection is declared dead.
pub const DEFAULT_RETRANSMIT_LIMIT: u32 = 8;
/// Default delayed-ACK interval.
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_millis(5);
/// Default send and receive buffer capacity (16 MiB each).
pub const DEFAULT_BUFFER_BYTES: usize = 16 * 1024 * 1024;

const SEGMENT_SIZE_RANGE: (usize, usize) = (512, 1400);
const WINDOW_PACKETS_RANGE: (usize, usize) = (1, 1024);
const RETRANSMIT_INTERVAL_RANGE: (Duration, Duration) =
    (Duration::from_millis(10), Duration::from_secs(60));
const RETRANSMIT_LIMIT_RANGE: (u32, u32) = (1, 64);
const MAX_ACK_DELAY: Duration = Duration::from_millis(500);
const BUFFER_BYTES_RANGE: (usize, usize) = (4 * 1024, 256 * 1024 * 1024);

/// Timing and sizing parameters for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum payload bytes carried by one data segment.
    pub max_segment_size: usize,
    /// Maximum number of unacknowledged segments in flight.
    ///
    /// Flow control counts segments, not bytes.
    pub max_window_packets: usize,
    /// Retransmission interval before any back-off.
    pub retransmit_interval: Duration,
    /// Ceiling for the exponentially backed-off retransmission interval.
    pub max_retransmit_interval: Duration,
    /// Retransmissions of a single segment before the connection fails.
    pub retransmit_limit: u32,
    /// How long an ACK may be held back to coalesce with later ones.
    /// Zero sends every ACK immediately.
    pub ack_delay: Duration,
    /// Capacity of the in-order receive buffer.
    pub recv_buffer_bytes: usize,
    /// Capacity of the outbound send buffer.
    pub send_buffer_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            max_window_packets: DEFAULT_WINDOW_PACKETS,
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            max_retransmit_interval: DEFAULT_MAX_RETRANSMIT_INTERVAL,
            retransmit_limit: DEFAULT_RETRANSMIT_LIMIT,
            ack_delay: DEFAULT_ACK_DELAY,
            recv_buffer_bytes: DEFAULT_BUFFER_BYTES,
            send_buffer_bytes: DEFAULT_BUFFER_BYTES,
        }
    }
}

impl Config {
    /// Fill zero fields with defaults, then clamp everything into range.
    ///
    /// `ack_delay` is the one field where zero is meaningful and is kept.
    /// Idempotent: normalizing twice gives the same result as once.
    pub fn normalize(&mut self) {
        let defaults = Config::default();

        if self.max_segment_size == 0 {
            self.max_segment_size = defaults.max_segment_size;
        }
        if self.max_window_packets == 0 {
            self.max_window_packets = defaults.max_window_packets;
        }
        if self.retransmit_interval.is_zero() {
            self.retransmit_interval = defaults.retransmit_interval;
        }
        if self.max_retransmit_interval.is_zero() {
            self.max_retransmit_interval = defaults.max_retransmit_interval;
        }
        if self.retransmit_limit == 0 {
            self.retransmit_limit = defaults.retransmit_limit;
        }
        if self.recv_buffer_bytes == 0 {
            self.recv_buffer_bytes = defaults.recv_buffer_bytes;
        }
        if self.send_buffer_bytes == 0 {
            self.send_buffer_bytes = defaults.send_buffer_bytes;
        }

        self.max_segment_size = self
            .max_segment_size
            .clamp(SEGMENT_SIZE_RANGE.0, SEGMENT_SIZE_RANGE.1);
        self.max_window_packets = self
            .max_window_packets
            .clamp(WINDOW_PACKETS_RANGE.0, WINDOW_PACKETS_RANGE.1);
        self.retransmit_interval = self
            .retransmit_interval
            .clamp(RETRANSMIT_INTERVAL_RANGE.0, RETRANSMIT_INTERVAL_RANGE.1);
        // The ceiling may never undercut the base interval.
        self.max_retransmit_interval = self
            .max_retransmit_interval
            .clamp(self.retransmit_interval, RETRANSMIT_INTERVAL_RANGE.1);
        self.retransmit_limit = self
            .retransmit_limit
            .clamp(RETRANSMIT_LIMIT_RANGE.0, RETRANSMIT_LIMIT_RANGE.1);
        self.ack_delay = self.ack_delay.min(MAX_ACK_DELAY);
        self.recv_buffer_bytes = self
            .recv_buffer_bytes
            .clamp(BUFFER_BYTES_RANGE.0, BUFFER_BYTES_RANGE.1);
        self.send_buffer_bytes = self
            .send_buffer_bytes
            .clamp(BUFFER_BYTES_RANGE.0, BUFFER_BYTES_RANGE.1);
    }

    /// By-value form of [`Config::normalize`].
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}
