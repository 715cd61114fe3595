//! Reliable byte-stream connection over UDP.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  write()                     read()
//!      ▼                                ▲
//!  ┌─────────────── Connection (Arc<Inner>) ───────────────┐
//!  │  send: Mutex<SendSide>           recv: Mutex<RecvSide> │
//!  │    ├── SendWindow                  ├── ReceiveWindow   │
//!  │    ├── retransmit TimerHandle      └── ack TimerHandle │
//!  │    └── Backoff                                         │
//!  └───────┬──────────────────────────────────▲────────────┘
//!          │ sender task                      │ process_segment()
//!          ▼                                  │
//!        Link ──────── UDP datagrams ─────────┘
//!   (owned socket for dialed connections,
//!    listener's shared socket for accepted ones)
//! ```
//!
//! Send-side and receive-side state sit behind separate locks so reads and
//! writes never contend.  No lock is held across an `.await`, and the two
//! locks are never held at the same time.
//!
//! Background work (the sender task, the outbound receive loop and both
//! timers) holds only a `Weak<Inner>`: dropping every [`Connection`] handle
//! shuts the connection down even without an explicit [`Connection::close`].

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::ConnError;
use crate::handshake;
use crate::packet::{flags, Segment};
use crate::receiver::ReceiveWindow;
use crate::sender::{Retransmit, SendWindow};
use crate::socket::{Link, Socket, SocketError};
use crate::state::ConnectionState;
use crate::timer::{Backoff, TimerHandle};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Handshake deadline used by [`Connection::dial`].
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Segments buffered for a connection that is still handshaking.
const HANDSHAKE_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// Per-side state
// ---------------------------------------------------------------------------

struct SendSide {
    window: SendWindow,
    retransmit: TimerHandle,
    backoff: Backoff,
}

struct RecvSide {
    window: ReceiveWindow,
    ack_timer: TimerHandle,
}

type Callback = Box<dyn FnOnce(Connection) + Send + 'static>;

/// One-shot event with any number of observers.  Every registered callback
/// runs exactly once; one registered after the event runs on its own task.
#[derive(Default)]
struct Hook {
    slot: Mutex<HookSlot>,
}

#[derive(Default)]
struct HookSlot {
    callbacks: Vec<Callback>,
    fired: bool,
}

impl Hook {
    fn register(&self, conn: Connection, callback: Callback) {
        let mut slot = self.slot.lock();
        if slot.fired {
            drop(slot);
            tokio::spawn(async move { callback(conn) });
        } else {
            slot.callbacks.push(callback);
        }
    }

    fn fire(&self, conn: Connection) {
        let callbacks = {
            let mut slot = self.slot.lock();
            if slot.fired {
                return;
            }
            slot.fired = true;
            std::mem::take(&mut slot.callbacks)
        };
        if callbacks.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for callback in callbacks {
                callback(conn.clone());
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    pub(crate) link: Link,
    local: Endpoint,
    remote: Endpoint,
    outbound: bool,
    config: Config,
    state: AtomicU8,
    closed: AtomicBool,
    send: Mutex<SendSide>,
    /// Wakes writers, flushers and the sender task.
    send_ready: Arc<Notify>,
    recv: Mutex<RecvSide>,
    /// Wakes readers.
    recv_ready: Arc<Notify>,
    handshake_tx: Mutex<Option<mpsc::Sender<Segment>>>,
    handshake_rx: Mutex<Option<mpsc::Receiver<Segment>>>,
    errors_tx: Mutex<Option<mpsc::Sender<ConnError>>>,
    errors_rx: Mutex<Option<mpsc::Receiver<ConnError>>>,
    on_established: Hook,
    on_closed: Hook,
}

impl Inner {
    fn new(
        link: Link,
        local: Endpoint,
        remote: Endpoint,
        outbound: bool,
        config: Config,
    ) -> Result<Arc<Self>, ConnError> {
        let config = config.normalized();
        let (handshake_tx, handshake_rx) = mpsc::channel(HANDSHAKE_QUEUE);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        Ok(Arc::new(Self {
            link,
            local,
            remote,
            outbound,
            state: AtomicU8::new(ConnectionState::Closed.as_u8()),
            closed: AtomicBool::new(false),
            send: Mutex::new(SendSide {
                window: SendWindow::new(&config)?,
                retransmit: TimerHandle::new(),
                backoff: Backoff::new(config.retransmit_interval, config.max_retransmit_interval),
            }),
            send_ready: Arc::new(Notify::new()),
            recv: Mutex::new(RecvSide {
                window: ReceiveWindow::new(config.recv_buffer_bytes),
                ack_timer: TimerHandle::new(),
            }),
            recv_ready: Arc::new(Notify::new()),
            handshake_tx: Mutex::new(Some(handshake_tx)),
            handshake_rx: Mutex::new(Some(handshake_rx)),
            errors_tx: Mutex::new(Some(errors_tx)),
            errors_rx: Mutex::new(Some(errors_rx)),
            on_established: Hook::default(),
            on_closed: Hook::default(),
            config,
        }))
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn remote(&self) -> Endpoint {
        self.remote
    }

    fn handle(self: &Arc<Self>) -> Connection {
        Connection {
            inner: Arc::clone(self),
        }
    }

    // -----------------------------------------------------------------------
    // Handshake plumbing
    // -----------------------------------------------------------------------

    /// Enter a handshake state and track its SYN or SYN|ACK for
    /// retransmission.
    pub(crate) fn begin_handshake(self: &Arc<Self>, state: ConnectionState, segment: Segment) {
        self.state.store(state.as_u8(), Ordering::Release);
        let mut send = self.send.lock();
        if send.window.track_handshake(segment) {
            self.arm_retransmit(&mut send);
        }
    }

    pub(crate) fn take_handshake_queue(&self) -> Option<mpsc::Receiver<Segment>> {
        self.handshake_rx.lock().take()
    }

    /// Switch to `Established`: position both windows, start the sender
    /// task and fire the established hook.
    pub(crate) fn finish_handshake(
        self: &Arc<Self>,
        local_isn: u32,
        remote_isn: u32,
    ) -> Result<(), ConnError> {
        let expected = {
            let mut recv = self.recv.lock();
            recv.window.start(remote_isn);
            recv.window.ack_number()
        };
        {
            let mut send = self.send.lock();
            send.window.finalize_handshake(local_isn, expected);
            if !send.window.has_unacked() {
                send.retransmit.cancel();
            }
            send.backoff.reset();
        }

        let from = self.state();
        if from == ConnectionState::Closed
            || self
                .state
                .compare_exchange(
                    from.as_u8(),
                    ConnectionState::Established.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            || self.is_closed()
        {
            return Err(ConnError::ConnectionClosed);
        }

        log::debug!(
            "[rudp] {} ESTABLISHED ({}) local_isn={local_isn} remote_isn={remote_isn}",
            self.remote,
            if self.outbound { "outbound" } else { "inbound" },
        );
        self.spawn_sender();
        self.on_established.fire(self.handle());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    /// Route one inbound segment by connection state and flags.
    pub(crate) async fn process_segment(self: &Arc<Self>, segment: Segment) {
        if self.is_closed() {
            return;
        }
        if self.state() != ConnectionState::Established {
            self.enqueue_handshake(segment);
            return;
        }

        if segment.has(flags::ACK) {
            self.handle_ack(segment.header.ack);
        }
        if segment.has(flags::SYN) || segment.has(flags::FIN) {
            self.handle_control(&segment).await;
        }
        if !segment.payload.is_empty() {
            self.handle_data(&segment).await;
        }
    }

    fn enqueue_handshake(&self, segment: Segment) {
        if let Some(tx) = self.handshake_tx.lock().as_ref() {
            if tx.try_send(segment).is_err() {
                log::trace!("[rudp] {} handshake queue full, dropping segment", self.remote);
            }
        }
    }

    fn handle_ack(self: &Arc<Self>, ack: u32) {
        {
            let mut send = self.send.lock();
            if send.window.on_ack(ack) == 0 {
                return;
            }
            send.backoff.reset();
            if send.window.has_unacked() {
                self.arm_retransmit(&mut send);
            } else {
                send.retransmit.cancel();
            }
        }
        log::trace!("[rudp] {} ← ACK ack={ack}", self.remote);
        self.send_ready.notify_waiters();
    }

    async fn handle_control(self: &Arc<Self>, segment: &Segment) {
        if segment.has(flags::SYN) {
            // Our final ACK was lost and the peer is still retransmitting.
            if segment.has(flags::ACK) && self.outbound {
                log::debug!("[rudp] {} duplicate SYN|ACK, re-acknowledging", self.remote);
                self.send_pure_ack().await;
            }
            return;
        }

        let at_edge = segment.payload.is_empty()
            && segment.header.seq == self.recv.lock().window.ack_number();
        if at_edge {
            log::debug!("[rudp] {} ← FIN seq={}", self.remote, segment.header.seq);
            self.shutdown(false).await;
        }
    }

    async fn handle_data(self: &Arc<Self>, segment: &Segment) {
        let (delivered, expected, ack_now) = {
            let mut recv = self.recv.lock();
            let delivered = recv.window.on_segment(segment.header.seq, &segment.payload);
            let expected = recv.window.ack_number();
            let ack_now = self.schedule_ack(&mut recv);
            (delivered, expected, ack_now)
        };
        log::trace!(
            "[rudp] {} ← DATA seq={} len={} delivered={delivered} exp={expected}",
            self.remote,
            segment.header.seq,
            segment.payload.len(),
        );

        if delivered > 0 {
            self.recv_ready.notify_waiters();
        }
        self.send.lock().window.advance_highest_ack(expected);
        if ack_now {
            self.send_pure_ack().await;
        }
    }

    // -----------------------------------------------------------------------
    // ACK emission
    // -----------------------------------------------------------------------

    /// Decide how an owed ACK goes out.  Returns `true` when it must be sent
    /// right away; otherwise the delayed-ACK timer is armed if it is not
    /// already running.
    ///
    /// A running timer is not restarted by later arrivals.  A delayed ACK
    /// that resets on every segment can be postponed indefinitely by a steady
    /// stream; here the owed ACK goes out at most `ack_delay` after the first
    /// segment that made it owed.
    fn schedule_ack(self: &Arc<Self>, recv: &mut RecvSide) -> bool {
        if !recv.window.ack_pending() {
            return false;
        }
        if self.config.ack_delay.is_zero() {
            recv.window.take_ack();
            return true;
        }
        if !recv.ack_timer.is_armed() {
            let weak = Arc::downgrade(self);
            recv.ack_timer.arm(self.config.ack_delay, move |generation| async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_ack_timeout(generation).await;
                }
            });
        }
        false
    }

    async fn on_ack_timeout(self: &Arc<Self>, generation: u64) {
        if self.is_closed() {
            return;
        }
        let owed = {
            let mut recv = self.recv.lock();
            recv.ack_timer.release(generation) && recv.window.take_ack()
        };
        if owed {
            self.send_pure_ack().await;
        }
    }

    async fn send_pure_ack(&self) {
        let ack = self.recv.lock().window.ack_number();
        let segment = Segment::control(flags::ACK, 0, ack, 0);
        if let Err(e) = self.transmit(segment).await {
            log::debug!("[rudp] {} failed to send ACK: {e}", self.remote);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound path
    // -----------------------------------------------------------------------

    /// Stamp the advertised window and send.
    pub(crate) async fn transmit(&self, mut segment: Segment) -> Result<(), SocketError> {
        segment.header.window = self.recv.lock().window.window_size();
        self.link.send_to(&segment, self.remote.addr()).await
    }

    fn next_outbound(self: &Arc<Self>) -> Option<Segment> {
        let mut send = self.send.lock();
        let (segment, arm) = send.window.next_segment()?;
        if arm {
            self.arm_retransmit(&mut send);
        }
        Some(segment)
    }

    fn spawn_sender(self: &Arc<Self>) {
        tokio::spawn(sender_loop(Arc::downgrade(self), Arc::clone(&self.send_ready)));
    }

    fn arm_retransmit(self: &Arc<Self>, send: &mut SendSide) {
        let weak = Arc::downgrade(self);
        send.retransmit.arm(send.backoff.current(), move |generation| async move {
            if let Some(inner) = weak.upgrade() {
                inner.on_retransmit_timeout(generation).await;
            }
        });
    }

    async fn on_retransmit_timeout(self: &Arc<Self>, generation: u64) {
        if self.is_closed() {
            return;
        }
        let batch = {
            let mut send = self.send.lock();
            if !send.retransmit.release(generation) {
                return;
            }
            match send.window.retransmit_batch(self.config.retransmit_limit) {
                Retransmit::Idle => return,
                Retransmit::LimitExceeded => None,
                Retransmit::Segments(segments) => {
                    send.backoff.back_off();
                    self.arm_retransmit(&mut send);
                    Some((segments, send.backoff.current()))
                }
            }
        };

        let Some((segments, next_rto)) = batch else {
            log::warn!(
                "[rudp] {} retransmission limit ({}) exceeded, closing",
                self.remote,
                self.config.retransmit_limit
            );
            self.fail(ConnError::RetransmissionLimitExceeded).await;
            return;
        };

        log::debug!(
            "[rudp] {} timeout, retransmitting {} segment(s), next rto={next_rto:?}",
            self.remote,
            segments.len()
        );
        for segment in segments {
            match self.transmit(segment).await {
                Ok(()) => {}
                Err(SocketError::Closed) => return,
                Err(e) => log::debug!("[rudp] {} retransmit failed: {e}", self.remote),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Deliver a fatal error exactly once, then close.
    async fn fail(self: &Arc<Self>, err: ConnError) {
        if let Some(tx) = self.errors_tx.lock().take() {
            let _ = tx.try_send(err);
        }
        self.shutdown(false).await;
    }

    /// Close the connection.  Idempotent.
    ///
    /// With `send_fin`, an established connection first sends one untracked
    /// FIN so the peer can stop reading without waiting for a timeout.
    pub(crate) async fn shutdown(self: &Arc<Self>, send_fin: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let was = self.state();
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);

        if send_fin && was == ConnectionState::Established {
            let fin = {
                let send = self.send.lock();
                Segment::control(
                    flags::FIN | flags::ACK,
                    send.window.next_seq(),
                    send.window.highest_ack(),
                    0,
                )
            };
            if let Err(e) = self.transmit(fin).await {
                log::debug!("[rudp] {} failed to send FIN: {e}", self.remote);
            }
        }

        self.send.lock().retransmit.cancel();
        self.recv.lock().ack_timer.cancel();
        self.handshake_tx.lock().take();
        self.errors_tx.lock().take();
        self.send_ready.notify_waiters();
        self.recv_ready.notify_waiters();
        self.link.release();

        log::debug!("[rudp] {} closed (was {was})", self.remote);
        self.on_closed.fire(self.handle());
    }

    /// Read loop for a dialed connection, which owns its socket.
    pub(crate) fn spawn_recv_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let socket = Arc::clone(self.link.socket());
        let remote = self.remote.addr();
        tokio::spawn(async move {
            loop {
                let res = socket.recv_from().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match res {
                    Ok((segment, from)) if from == remote => inner.process_segment(segment).await,
                    Ok((_, from)) => log::trace!("[rudp] dropping datagram from stranger {from}"),
                    Err(SocketError::Closed) => return,
                    Err(SocketError::Packet(e)) => log::trace!("[rudp] dropping malformed datagram: {e}"),
                    Err(e) => log::debug!("[rudp] {remote} receive error: {e}"),
                }
                if inner.is_closed() {
                    return;
                }
            }
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.send.get_mut().retransmit.cancel();
        self.recv.get_mut().ack_timer.cancel();
        self.link.release();
        self.send_ready.notify_waiters();
        self.recv_ready.notify_waiters();
    }
}

/// Background task that turns buffered bytes into segments.
///
/// Blocks while the buffer is empty or the window is full.  A failed
/// transmission is rolled back so the sequence space stays contiguous.
async fn sender_loop(weak: Weak<Inner>, ready: Arc<Notify>) {
    loop {
        let notified = ready.notified();
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.is_closed() {
            return;
        }
        let Some(segment) = inner.next_outbound() else {
            drop(inner);
            notified.await;
            continue;
        };

        // Room just opened up in the send buffer.
        ready.notify_waiters();

        let seq = segment.header.seq;
        let len = segment.payload.len();
        match inner.transmit(segment).await {
            Ok(()) => log::trace!("[rudp] {} → DATA seq={seq} len={len}", inner.remote),
            Err(SocketError::Closed) => return,
            Err(e) => {
                log::debug!("[rudp] {} send failed, rolling back seq={seq}: {e}", inner.remote);
                inner.send.lock().window.rollback(seq);
                let pause = inner.config.retransmit_interval;
                drop(inner);
                tokio::time::sleep(pause).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A reliable, ordered byte stream to one peer.
///
/// Cheap to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Dial `remote` with the default handshake timeout.
    pub async fn dial(remote: Endpoint, config: Config) -> Result<Connection, ConnError> {
        Self::dial_with(
            remote,
            config,
            DEFAULT_HANDSHAKE_TIMEOUT,
            &CancellationToken::new(),
        )
        .await
    }

    /// Dial `remote` on a fresh ephemeral socket owned by the connection.
    ///
    /// Fails with [`ConnError::HandshakeTimeout`] if no valid SYN|ACK arrives
    /// within `timeout`, or as soon as `cancel` fires.
    pub async fn dial_with(
        remote: Endpoint,
        config: Config,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Connection, ConnError> {
        let bind: SocketAddr = if remote.addr().is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Arc::new(Socket::bind(bind).await?);
        let local = Endpoint::from(socket.local_addr);
        let inner = Inner::new(Link::Owned(socket), local, remote, true, config)?;

        match handshake::client(&inner, timeout, cancel).await {
            Ok(()) => Ok(Connection { inner }),
            Err(e) => {
                inner.shutdown(false).await;
                Err(e)
            }
        }
    }

    /// A server-side connection on the listener's shared socket, not yet
    /// handshaking.
    pub(crate) fn inbound(
        socket: Arc<Socket>,
        remote: Endpoint,
        config: Config,
    ) -> Result<Connection, ConnError> {
        let local = Endpoint::from(socket.local_addr);
        let inner = Inner::new(Link::Shared(socket), local, remote, false, config)?;
        Ok(Connection { inner })
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Read in-order bytes into `buf`.
    ///
    /// Blocks until data is available.  Returns `Ok(0)` at end of stream:
    /// the connection is closed and every buffered byte has been read.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, ConnError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inner = &self.inner;
        loop {
            let notified = inner.recv_ready.notified();
            {
                let mut recv = inner.recv.lock();
                if !recv.window.is_empty() {
                    return Ok(recv.window.read(buf));
                }
            }
            if inner.is_closed() {
                return Ok(0);
            }
            if inner.state() != ConnectionState::Established {
                return Err(ConnError::ConnectionNotEstablished);
            }
            notified.await;
        }
    }

    /// Queue all of `data` for delivery.
    ///
    /// Blocks while the send buffer is full.  Returns once every byte is
    /// queued, not once it has been acknowledged; see [`Connection::flush`].
    pub async fn write(&self, data: &[u8]) -> Result<usize, ConnError> {
        let inner = &self.inner;
        let mut written = 0;
        while written < data.len() {
            let notified = inner.send_ready.notified();
            if inner.is_closed() {
                return Err(ConnError::ConnectionClosed);
            }
            if inner.state() != ConnectionState::Established {
                return Err(ConnError::ConnectionNotEstablished);
            }
            let n = inner.send.lock().window.queue(&data[written..]);
            if n > 0 {
                written += n;
                inner.send_ready.notify_waiters();
                continue;
            }
            notified.await;
        }
        Ok(written)
    }

    /// Wait until every queued byte has been sent and acknowledged.
    pub async fn flush(&self) -> Result<(), ConnError> {
        let inner = &self.inner;
        loop {
            let notified = inner.send_ready.notified();
            if inner.is_closed() {
                return Err(ConnError::ConnectionClosed);
            }
            if inner.state() != ConnectionState::Established {
                return Err(ConnError::ConnectionNotEstablished);
            }
            if inner.send.lock().window.is_drained() {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Close the connection.  Idempotent and safe to call concurrently with
    /// any other operation; blocked readers and writers wake up.
    pub async fn close(&self) {
        self.inner.shutdown(true).await;
    }

    // -----------------------------------------------------------------------
    // Introspection and hooks
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.inner.local
    }

    pub fn remote_endpoint(&self) -> Endpoint {
        self.inner.remote
    }

    /// `true` for a dialed connection, `false` for an accepted one.
    pub fn is_outbound(&self) -> bool {
        self.inner.outbound
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The fatal-error channel.  Handed out once; yields at most one error
    /// and closes when the connection does.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<ConnError>> {
        self.inner.errors_rx.lock().take()
    }

    /// Run `callback` once the connection is established.  Runs immediately
    /// (on a separate task) if that already happened.
    pub fn on_established<F>(&self, callback: F)
    where
        F: FnOnce(Connection) + Send + 'static,
    {
        self.inner
            .on_established
            .register(self.clone(), Box::new(callback));
    }

    /// Run `callback` once the connection closes.  Runs immediately (on a
    /// separate task) if that already happened.  Callbacks accumulate; a
    /// later registration never displaces an earlier one.
    pub fn on_closed<F>(&self, callback: F)
    where
        F: FnOnce(Connection) + Send + 'static,
    {
        self.inner.on_closed.register(self.clone(), Box::new(callback));
    }

    /// `true` when both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.inner.local)
            .field("remote", &self.inner.remote)
            .field("outbound", &self.inner.outbound)
            .field("state", &self.inner.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
