//! Server side: one UDP socket shared by many inbound connections.
//!
//! A single read loop owns the receive half of the socket.  Each datagram is
//! decoded and routed by source address:
//!
//! - known address → handed to that connection (its handshake queue until it
//!   is established, straight to ACK/control/data handling afterwards);
//! - unknown address carrying a bare SYN → a new connection is registered
//!   and its server handshake started under a deadline;
//! - anything else → dropped.
//!
//! Established connections land in a bounded accept queue.  If the queue is
//! full the connection is closed rather than left established and
//! undelivered: the peer sees a FIN (or, if that is lost, hits its
//! retransmission limit) instead of talking to a connection nobody will
//! ever read.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::{Connection, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::endpoint::Endpoint;
use crate::error::ConnError;
use crate::handshake;
use crate::packet::{flags, Segment};
use crate::socket::{Socket, SocketError};

/// Established connections waiting for `accept`.
const ACCEPT_BACKLOG: usize = 32;

struct Shared {
    socket: Arc<Socket>,
    config: Config,
    handshake_timeout: Duration,
    /// Every live inbound connection, including those mid-handshake.
    conns: Mutex<HashMap<SocketAddr, Connection>>,
    accept_tx: mpsc::Sender<Connection>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn dispatch(self: &Arc<Self>, segment: Segment, from: SocketAddr) {
        let existing = self.conns.lock().get(&from).cloned();
        if let Some(conn) = existing {
            conn.inner().process_segment(segment).await;
            return;
        }

        if !segment.has(flags::SYN) || segment.has(flags::ACK) {
            log::trace!("[listener] dropping {:?} from unknown peer {from}", segment.header);
            return;
        }
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.register(from, segment.header.seq) {
            log::warn!("[listener] cannot create connection for {from}: {e}");
        }
    }

    /// Track a new inbound connection and start its handshake.
    fn register(self: &Arc<Self>, from: SocketAddr, remote_isn: u32) -> Result<(), ConnError> {
        let conn = Connection::inbound(Arc::clone(&self.socket), Endpoint::from(from), self.config)?;
        self.conns.lock().insert(from, conn.clone());
        log::debug!("[listener] ← SYN from {from} seq={remote_isn}");

        let weak = Arc::downgrade(self);
        conn.on_established(move |conn| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(conn);
            }
        });
        let weak = Arc::downgrade(self);
        conn.on_closed(move |conn| {
            if let Some(shared) = weak.upgrade() {
                shared.forget(&conn);
            }
        });

        let shutdown = self.shutdown.clone();
        let timeout = self.handshake_timeout;
        tokio::spawn(async move {
            let inner = conn.inner();
            let res = tokio::select! {
                _ = shutdown.cancelled() => Err(ConnError::ListenerClosed),
                res = tokio::time::timeout(timeout, handshake::server(inner, remote_isn)) => {
                    match res {
                        Ok(res) => res,
                        Err(_) => Err(ConnError::HandshakeTimeout),
                    }
                }
            };
            if let Err(e) = res {
                log::debug!("[listener] handshake with {from} failed: {e}");
                inner.shutdown(false).await;
            }
        });
        Ok(())
    }

    fn deliver(&self, conn: Connection) {
        match self.accept_tx.try_send(conn) {
            Ok(()) => {}
            Err(TrySendError::Full(conn)) => {
                log::warn!(
                    "[listener] accept queue full, dropping {}",
                    conn.remote_endpoint()
                );
                tokio::spawn(async move { conn.close().await });
            }
            Err(TrySendError::Closed(conn)) => {
                tokio::spawn(async move { conn.close().await });
            }
        }
    }

    fn forget(&self, conn: &Connection) {
        let addr = conn.remote_endpoint().addr();
        let mut conns = self.conns.lock();
        if conns.get(&addr).is_some_and(|c| c.ptr_eq(conn)) {
            conns.remove(&addr);
        }
    }

    fn begin_close(&self) -> Option<Vec<Connection>> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.shutdown.cancel();
        let conns = self.conns.lock().drain().map(|(_, c)| c).collect();
        Some(conns)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(conns) = self.begin_close() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    for conn in conns {
                        conn.close().await;
                    }
                });
            }
        }
        self.socket.close();
    }
}

async fn read_loop(weak: Weak<Shared>, socket: Arc<Socket>) {
    loop {
        let res = socket.recv_from().await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match res {
            Ok((segment, from)) => shared.dispatch(segment, from).await,
            Err(SocketError::Closed) => return,
            Err(SocketError::Packet(e)) => log::trace!("[listener] dropping malformed datagram: {e}"),
            Err(e) => log::debug!("[listener] receive error: {e}"),
        }
    }
}

/// Accepts inbound connections on one UDP socket.
pub struct Listener {
    shared: Arc<Shared>,
}

impl Listener {
    /// Bind `addr` and start demultiplexing.
    ///
    /// Each inbound handshake must finish within `handshake_timeout`; zero
    /// selects [`DEFAULT_HANDSHAKE_TIMEOUT`].
    pub async fn listen(
        addr: SocketAddr,
        config: Config,
        handshake_timeout: Duration,
    ) -> Result<Listener, ConnError> {
        let socket = Arc::new(Socket::bind(addr).await?);
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let shared = Arc::new(Shared {
            socket: Arc::clone(&socket),
            config: config.normalized(),
            handshake_timeout: if handshake_timeout.is_zero() {
                DEFAULT_HANDSHAKE_TIMEOUT
            } else {
                handshake_timeout
            },
            conns: Mutex::new(HashMap::new()),
            accept_tx,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        log::info!("[listener] listening on {}", socket.local_addr);
        tokio::spawn(read_loop(Arc::downgrade(&shared), socket));
        Ok(Listener { shared })
    }

    /// Wait for the next established connection.
    pub async fn accept(&self) -> Result<Connection, ConnError> {
        self.accept_with(&CancellationToken::new()).await
    }

    /// Like [`Listener::accept`], but gives up with
    /// [`ConnError::Cancelled`] once `cancel` fires.
    pub async fn accept_with(&self, cancel: &CancellationToken) -> Result<Connection, ConnError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(ConnError::ListenerClosed);
        }
        let mut queue = tokio::select! {
            _ = shared.shutdown.cancelled() => return Err(ConnError::ListenerClosed),
            _ = cancel.cancelled() => return Err(ConnError::Cancelled),
            queue = shared.accept_rx.lock() => queue,
        };
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => Err(ConnError::ListenerClosed),
            _ = cancel.cancelled() => Err(ConnError::Cancelled),
            conn = queue.recv() => conn.ok_or(ConnError::ListenerClosed),
        }
    }

    /// Stop listening.  Idempotent: closes every tracked connection, then
    /// the socket, and fails all pending `accept` calls.
    pub async fn close(&self) {
        let Some(conns) = self.shared.begin_close() else {
            return;
        };
        log::info!("[listener] closing, {} connection(s) tracked", conns.len());
        for conn in conns {
            conn.close().await;
        }
        self.shared.socket.close();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.socket.local_addr
    }

    /// Number of tracked connections, including those mid-handshake.
    pub fn connection_count(&self) -> usize {
        self.shared.conns.lock().len()
    }
}
