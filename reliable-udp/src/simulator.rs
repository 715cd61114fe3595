//! Fault-injecting UDP relay for exercising the reliability machinery.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! transport without depending on actual network conditions, a [`Simulator`]
//! sits between a client and a server and applies a configurable fault
//! model to every datagram it forwards:
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Packet loss  | Drop a datagram with probability `loss_rate`.        |
//! | Reordering   | Hold a datagram back by `reorder_delay`, letting     |
//! |              | later ones overtake it.                              |
//! | Duplication  | Deliver a datagram twice.                            |
//!
//! ```text
//!  client ──▶ front socket ──(faults)──▶ back socket ──▶ upstream
//!  client ◀── front socket ◀─(faults)─── back socket ◀── upstream
//! ```
//!
//! The client is whoever sends to the front socket first.  Each direction
//! draws from its own seeded RNG, so a run is reproducible for a given seed
//! and traffic pattern.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::packet::Segment;
use crate::socket::SocketError;

const MAX_DATAGRAM: usize = 65_535;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside it are
/// clamped.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is held back.
    pub reorder_rate: f64,
    /// Delay applied to held-back datagrams.
    pub reorder_delay: Duration,
    /// RNG seed.
    pub seed: u64,
    /// Only datagrams carrying payload are subject to faults; handshake and
    /// pure ACK traffic always passes.
    pub data_only: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(20),
            seed: 0,
            data_only: false,
        }
    }
}

/// Running totals across both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

struct Shared {
    config: SimulatorConfig,
    /// Current loss rate as `f64` bits; adjustable while running.
    loss_rate: AtomicU64,
    stats: Mutex<SimulatorStats>,
    client: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Upstream,
    Downstream,
}

enum Fate {
    Drop,
    Deliver { copies: usize, delay: Option<Duration> },
}

fn chance(rng: &mut StdRng, p: f64) -> bool {
    if p.is_nan() || p <= 0.0 {
        return false;
    }
    rng.random_bool(p.min(1.0))
}

fn carries_data(datagram: &[u8]) -> bool {
    Segment::decode(datagram).is_ok_and(|s| !s.payload.is_empty())
}

/// A running relay.  Dropping it stops both directions.
pub struct Simulator {
    front_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl Simulator {
    /// Bind `listen` and relay everything to `upstream` through the fault
    /// model.
    pub async fn start(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: SimulatorConfig,
    ) -> Result<Simulator, SocketError> {
        let front = Arc::new(UdpSocket::bind(listen).await?);
        let back_bind: SocketAddr = if upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let back = Arc::new(UdpSocket::bind(back_bind).await?);
        let front_addr = front.local_addr()?;

        let shared = Arc::new(Shared {
            loss_rate: AtomicU64::new(config.loss_rate.to_bits()),
            stats: Mutex::new(SimulatorStats::default()),
            client: Mutex::new(None),
            shutdown: CancellationToken::new(),
            config,
        });
        let seed = shared.config.seed;

        tokio::spawn(relay(
            Direction::Upstream,
            StdRng::seed_from_u64(seed),
            Arc::clone(&front),
            Arc::clone(&back),
            upstream,
            Arc::clone(&shared),
        ));
        tokio::spawn(relay(
            Direction::Downstream,
            StdRng::seed_from_u64(seed.wrapping_add(1)),
            back,
            front,
            upstream,
            Arc::clone(&shared),
        ));

        log::info!("[sim] relaying {front_addr} <-> {upstream}");
        Ok(Simulator { front_addr, shared })
    }

    /// The address clients should send to.
    pub fn local_addr(&self) -> SocketAddr {
        self.front_addr
    }

    /// Change the loss rate of both directions while running.
    pub fn set_loss_rate(&self, p: f64) {
        self.shared.loss_rate.store(p.to_bits(), Ordering::Relaxed);
    }

    pub fn stats(&self) -> SimulatorStats {
        *self.shared.stats.lock()
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn decide(&self, rng: &mut StdRng, datagram: &[u8]) -> Fate {
        if self.config.data_only && !carries_data(datagram) {
            return Fate::Deliver {
                copies: 1,
                delay: None,
            };
        }
        let loss = f64::from_bits(self.loss_rate.load(Ordering::Relaxed));
        if chance(rng, loss) {
            return Fate::Drop;
        }
        let copies = if chance(rng, self.config.duplicate_rate) { 2 } else { 1 };
        let delay = chance(rng, self.config.reorder_rate).then_some(self.config.reorder_delay);
        Fate::Deliver { copies, delay }
    }
}

async fn relay(
    direction: Direction,
    mut rng: StdRng,
    src: Arc<UdpSocket>,
    dst: Arc<UdpSocket>,
    upstream: SocketAddr,
    shared: Arc<Shared>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            res = src.recv_from(&mut buf) => match res {
                Ok(v) => v,
                Err(e) => {
                    log::debug!("[sim] {direction:?} receive error: {e}");
                    continue;
                }
            },
        };

        let dest = match direction {
            Direction::Upstream => {
                let mut client = shared.client.lock();
                match *client {
                    Some(c) if c != from => continue,
                    Some(_) => {}
                    None => *client = Some(from),
                }
                upstream
            }
            Direction::Downstream => {
                if from != upstream {
                    continue;
                }
                match *shared.client.lock() {
                    Some(c) => c,
                    None => continue,
                }
            }
        };

        let datagram = buf[..n].to_vec();
        match shared.decide(&mut rng, &datagram) {
            Fate::Drop => {
                shared.stats.lock().dropped += 1;
                log::trace!("[sim] {direction:?} dropped {n} bytes");
            }
            Fate::Deliver { copies, delay } => {
                {
                    let mut stats = shared.stats.lock();
                    stats.forwarded += 1;
                    if copies > 1 {
                        stats.duplicated += 1;
                    }
                    if delay.is_some() {
                        stats.reordered += 1;
                    }
                }
                match delay {
                    None => {
                        for _ in 0..copies {
                            if let Err(e) = dst.send_to(&datagram, dest).await {
                                log::debug!("[sim] {direction:?} send error: {e}");
                            }
                        }
                    }
                    Some(delay) => {
                        let dst = Arc::clone(&dst);
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            for _ in 0..copies {
                                let _ = dst.send_to(&datagram, dest).await;
                            }
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    async fn echo_server() -> SocketAddr {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((n, from)) = sock.recv_from(&mut buf).await {
                let _ = sock.send_to(&buf[..n], from).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn transparent_by_default() {
        let upstream = echo_server().await;
        let sim = Simulator::start(
            "127.0.0.1:0".parse().unwrap(),
            upstream,
            SimulatorConfig::default(),
        )
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", sim.local_addr()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, sim.local_addr());
        assert_eq!(sim.stats().forwarded, 2);
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let upstream = echo_server().await;
        let sim = Simulator::start(
            "127.0.0.1:0".parse().unwrap(),
            upstream,
            SimulatorConfig {
                loss_rate: 1.0,
                ..SimulatorConfig::default()
            },
        )
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..5 {
            client.send_to(b"x", sim.local_addr()).await.unwrap();
        }
        let mut buf = [0u8; 16];
        let res =
            tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(res.is_err());
        assert_eq!(sim.stats().dropped, 5);
    }

    #[test]
    fn data_only_spares_control_segments() {
        let shared = Shared {
            config: SimulatorConfig {
                loss_rate: 1.0,
                data_only: true,
                ..SimulatorConfig::default()
            },
            loss_rate: AtomicU64::new(1.0f64.to_bits()),
            stats: Mutex::new(SimulatorStats::default()),
            client: Mutex::new(None),
            shutdown: CancellationToken::new(),
        };
        let mut rng = StdRng::seed_from_u64(7);
        let ack = Segment::control(flags::ACK, 0, 1, 0).encode().unwrap();
        let data = Segment::data(1, 1, 0, b"x".to_vec()).encode().unwrap();
        assert!(matches!(shared.decide(&mut rng, &ack), Fate::Deliver { .. }));
        assert!(matches!(shared.decide(&mut rng, &data), Fate::Drop));
    }

    #[test]
    fn chance_handles_out_of_range() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!chance(&mut rng, 0.0));
        assert!(!chance(&mut rng, -3.0));
        assert!(!chance(&mut rng, f64::NAN));
        assert!(chance(&mut rng, 1.0));
        assert!(chance(&mut rng, 7.0));
    }
}
