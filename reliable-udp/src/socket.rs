//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Segment`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O plus a shutdown signal that
//! unblocks every pending receive when the socket is closed.
//!
//! [`Link`] records who is responsible for closing a socket: an outbound
//! connection owns its socket outright, while inbound connections share the
//! listener's socket and must leave it open.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::packet::{PacketError, Segment};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram could not be encoded or decoded as a segment.
    #[error("segment codec error: {0}")]
    Packet(#[from] PacketError),
    /// The socket was closed locally.
    #[error("socket closed")]
    Closed,
    /// No datagram arrived before the deadline.
    #[error("receive timed out")]
    TimedOut,
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, segment-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    shutdown: CancellationToken,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            shutdown: CancellationToken::new(),
        })
    }

    /// Encode `segment` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        let bytes = segment.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Segment`].
    ///
    /// Returns `(segment, sender_address)`.  Datagrams that fail to decode
    /// are returned as [`SocketError::Packet`]; the caller decides whether to
    /// keep reading.  Fails with [`SocketError::Closed`] as soon as the
    /// socket is closed, even while waiting.
    pub async fn recv_from(&self) -> Result<(Segment, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(SocketError::Closed),
            res = self.inner.recv_from(&mut buf) => res?,
        };
        let segment = Segment::decode(&buf[..n])?;
        Ok((segment, addr))
    }

    /// [`Socket::recv_from`] with a deadline.
    pub async fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<(Segment, SocketAddr), SocketError> {
        match tokio::time::timeout(timeout, self.recv_from()).await {
            Ok(res) => res,
            Err(_) => Err(SocketError::TimedOut),
        }
    }

    /// Stop all I/O on this socket.  Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// A connection's handle on its socket.
#[derive(Debug, Clone)]
pub enum Link {
    /// Exclusively owned: closed together with the connection.
    Owned(Arc<Socket>),
    /// Borrowed from a listener: never closed by the connection.
    Shared(Arc<Socket>),
}

impl Link {
    pub fn socket(&self) -> &Arc<Socket> {
        match self {
            Self::Owned(s) | Self::Shared(s) => s,
        }
    }

    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> Result<(), SocketError> {
        self.socket().send_to(segment, dest).await
    }

    /// Give the socket back: an owned socket is closed, a shared one is left
    /// untouched.
    pub fn release(&self) {
        if let Self::Owned(socket) = self {
            socket.close();
        }
    }
}
