//! Three-way handshake, client and server sides.
//!
//! ```text
//!  client                                   server
//!    │ ── SYN(seq=c) ───────────────────────▶ │  SynSent / SynReceived
//!    │ ◀── SYN|ACK(seq=s, ack=c+1) ────────── │
//!    │ ── ACK(seq=c+1, ack=s+1) ────────────▶ │  Established
//! ```
//!
//! The SYN and SYN|ACK are tracked like data and retransmitted by the
//! connection's retransmission timer until acknowledged.  Each consumes one
//! sequence number, so data starts at `isn + 1` in both directions.
//!
//! The client reads its own socket directly, polling with a short deadline
//! so cancellation is noticed promptly.  The server is fed by the listener
//! through the connection's handshake queue.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::Inner;
use crate::error::ConnError;
use crate::packet::{flags, Segment};
use crate::socket::SocketError;
use crate::state::ConnectionState;

/// Upper bound on one client receive wait.
const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// A random, non-zero initial sequence number.
pub(crate) fn random_isn() -> u32 {
    let mut rng = rand::rng();
    loop {
        let isn: u32 = rng.random();
        if isn != 0 {
            return isn;
        }
    }
}

/// Active open.  On success the connection is established and its receive
/// loop is running.
pub(crate) async fn client(
    inner: &Arc<Inner>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ConnError> {
    let remote = inner.remote();
    let isn = random_isn();
    let syn = Segment::control(flags::SYN, isn, 0, 0);
    inner.begin_handshake(ConnectionState::SynSent, syn.clone());
    log::debug!("[rudp] {remote} → SYN seq={isn}");
    if let Err(e) = inner.transmit(syn).await {
        // the retransmission timer will try again
        log::debug!("[rudp] {remote} SYN send failed: {e}");
    }

    let deadline = Instant::now() + timeout;
    let socket = Arc::clone(inner.link.socket());
    let remote_isn = loop {
        if inner.is_closed() {
            return Err(ConnError::HandshakeTimeout);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            log::debug!("[rudp] {remote} handshake timed out");
            return Err(ConnError::HandshakeTimeout);
        }

        let res = tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("[rudp] {remote} handshake cancelled");
                return Err(ConnError::HandshakeTimeout);
            }
            res = socket.recv_timeout(remaining.min(POLL_INTERVAL)) => res,
        };
        match res {
            Ok((seg, from))
                if from == remote.addr()
                    && seg.has(flags::SYN | flags::ACK)
                    && seg.header.ack == isn.wrapping_add(1)
                    && seg.header.seq != 0 =>
            {
                break seg.header.seq;
            }
            Ok((seg, from)) => {
                log::trace!("[rudp] ignoring {:?} from {from} during handshake", seg.header);
            }
            Err(SocketError::TimedOut) => {}
            Err(SocketError::Packet(e)) => log::trace!("[rudp] dropping malformed datagram: {e}"),
            Err(SocketError::Closed) => return Err(ConnError::HandshakeTimeout),
            Err(e) => log::debug!("[rudp] {remote} receive error during handshake: {e}"),
        }
    };
    log::debug!("[rudp] {remote} ← SYN|ACK seq={remote_isn}");

    let ack = Segment::control(
        flags::ACK,
        isn.wrapping_add(1),
        remote_isn.wrapping_add(1),
        0,
    );
    if let Err(e) = inner.transmit(ack).await {
        // a lost final ACK is repaired when the server retransmits SYN|ACK
        log::debug!("[rudp] {remote} final ACK send failed: {e}");
    }
    inner.finish_handshake(isn, remote_isn)?;
    inner.spawn_recv_loop();
    Ok(())
}

/// Passive open, after the listener saw a SYN carrying `remote_isn`.
///
/// Finishes on an ACK of our SYN|ACK.  A data segment that carries that ACK
/// also completes the handshake and its payload is delivered.
pub(crate) async fn server(inner: &Arc<Inner>, remote_isn: u32) -> Result<(), ConnError> {
    let remote = inner.remote();
    let mut queue = inner
        .take_handshake_queue()
        .ok_or(ConnError::ConnectionClosed)?;

    let isn = random_isn();
    let synack = Segment::control(flags::SYN | flags::ACK, isn, remote_isn.wrapping_add(1), 0);
    inner.begin_handshake(ConnectionState::SynReceived, synack.clone());
    log::debug!("[rudp] {remote} → SYN|ACK seq={isn} ack={}", remote_isn.wrapping_add(1));
    if let Err(e) = inner.transmit(synack.clone()).await {
        log::debug!("[rudp] {remote} SYN|ACK send failed: {e}");
    }

    loop {
        let Some(seg) = queue.recv().await else {
            return Err(ConnError::ConnectionClosed);
        };

        if seg.has(flags::SYN) && !seg.has(flags::ACK) {
            // The client has not seen our SYN|ACK yet.
            if seg.header.seq == remote_isn {
                log::debug!("[rudp] {remote} duplicate SYN, resending SYN|ACK");
                if let Err(e) = inner.transmit(synack.clone()).await {
                    log::debug!("[rudp] {remote} SYN|ACK send failed: {e}");
                }
            }
            continue;
        }

        if seg.has(flags::ACK) && !seg.has(flags::SYN) && seg.header.ack == isn.wrapping_add(1) {
            inner.finish_handshake(isn, remote_isn)?;
            if !seg.payload.is_empty() {
                inner.process_segment(seg).await;
            }
            while let Ok(seg) = queue.try_recv() {
                inner.process_segment(seg).await;
            }
            return Ok(());
        }
    }
}
