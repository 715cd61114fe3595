//! Segment codec.
//!
//! A [`Segment`] is one datagram: a fixed 13-byte header followed by the
//! payload.  Encoding and decoding are pure; malformed input is reported as a
//! [`PacketError`] and never reaches a connection.
//!
//! ```text
//!  offset  size  field
//!  ------  ----  ------------------------------------------
//!       0     4  seq     first payload byte, or the ISN on SYN
//!       4     4  ack     next byte expected from the peer
//!       8     1  flags   SYN=0x01 ACK=0x02 FIN=0x04
//!       9     2  window  free receive capacity, saturated
//!      11     2  length  payload bytes that follow
//!      13     *  payload
//! ```
//!
//! Multi-byte fields are big-endian.

use thiserror::Error;

/// Header flag bits.
pub mod flags {
    /// Opens a connection; `seq` carries the ISN.
    pub const SYN: u8 = 0b0000_0001;
    /// `ack` is meaningful.
    pub const ACK: u8 = 0b0000_0010;
    /// Sender is closing the connection.
    pub const FIN: u8 = 0b0000_0100;
}

/// Size of the fixed header.
pub const HEADER_LEN: usize = 13;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_WINDOW: usize = 9;
const OFF_LENGTH: usize = 11;

/// Fixed-size segment header.
///
/// The payload length is not stored here; it is always derived from the
/// payload itself so a [`Segment`] can never disagree with its own length
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Byte offset of the first payload byte, or the offset consumed by a
    /// SYN / FIN control segment.
    pub seq: u32,
    /// Cumulative acknowledgement: every byte before this offset has arrived.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised free receive capacity in bytes (saturating).
    pub window: u16,
}

/// A complete transport datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// A payload-free segment carrying only control flags.
    pub fn control(flags: u8, seq: u32, ack: u32, window: u16) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: Vec::new(),
        }
    }

    /// A data segment piggybacking a cumulative ACK.
    pub fn data(seq: u32, ack: u32, window: u16, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flags: flags::ACK,
                window,
            },
            payload,
        }
    }

    /// `true` when every bit in `mask` is set.
    pub fn has(&self, mask: u8) -> bool {
        self.header.flags & mask == mask
    }

    /// `true` for an ACK that carries neither payload nor other flags.
    pub fn is_pure_ack(&self) -> bool {
        self.header.flags == flags::ACK && self.payload.is_empty()
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// Fails only when the payload cannot be described by the 16-bit length
    /// field.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(len));
        }
        let mut buf = vec![0u8; HEADER_LEN + len];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&(len as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        Ok(buf)
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the length field disagrees with the bytes that follow the header, or
    /// - the segment has neither payload nor flags.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::PacketTooShort(buf.len()));
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let flags = buf[OFF_FLAGS];
        let window = read_u16(buf, OFF_WINDOW);
        let declared = read_u16(buf, OFF_LENGTH) as usize;

        let actual = buf.len() - HEADER_LEN;
        if declared != actual {
            return Err(PacketError::InvalidPayloadLength { declared, actual });
        }
        if declared == 0 && flags == 0 {
            return Err(PacketError::EmptySegment);
        }

        Ok(Segment {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Errors that can arise when parsing or building a raw datagram.
///
/// Parse errors never reach the application: receive loops drop the
/// offending datagram and keep going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    PacketTooShort(usize),
    /// Length field does not match the bytes remaining after the header.
    #[error("length field says {declared} bytes but {actual} follow the header")]
    InvalidPayloadLength { declared: usize, actual: usize },
    /// No payload and no flags: the segment carries nothing.
    #[error("segment has neither payload nor flags")]
    EmptySegment,
    /// Payload does not fit the 16-bit length field.
    #[error("payload of {0} bytes exceeds the length field")]
    PayloadTooLarge(usize),
}
