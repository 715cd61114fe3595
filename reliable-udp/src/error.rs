//! Connection-level error type.
//!
//! Parse failures ([`crate::packet::PacketError`]) never show up here: they
//! are absorbed by the receive loops, which drop the datagram.  Everything in
//! [`ConnError`] is something a caller of `dial`, `read`, `write` or `accept`
//! can actually observe.

use thiserror::Error;

use crate::socket::SocketError;

/// Errors surfaced by connections and listeners.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The handshake did not complete before its deadline or was cancelled.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// Read or write attempted before the handshake completed.
    #[error("connection not established")]
    ConnectionNotEstablished,
    /// A segment went unacknowledged through every allowed retransmission.
    #[error("retransmission limit exceeded")]
    RetransmissionLimitExceeded,
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// The segment size cannot be used to build segments.
    #[error("invalid maximum segment size {0}")]
    InvalidSegmentSize(usize),
    /// The listener has been closed.
    #[error("listener closed")]
    ListenerClosed,
    /// The caller cancelled the wait.
    #[error("operation cancelled")]
    Cancelled,
    /// The underlying socket failed.
    #[error(transparent)]
    Socket(#[from] SocketError),
}
