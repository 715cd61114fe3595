//! Entry point for `reliable-udp`.
//!
//! Parses CLI arguments and dispatches into **server**, **client** or
//! **relay** mode.  All protocol work is delegated to the library; `main.rs`
//! owns only process setup (logging, argument parsing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use reliable_udp::simulator::{Simulator, SimulatorConfig};
use reliable_udp::{Config, Connection, Endpoint, Listener};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as an echo server, accepting incoming connections.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Run as a client: send stdin lines, print what comes back.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: Endpoint,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Relay datagrams to an upstream server through a lossy link.
    Relay {
        /// Local address clients send to.
        #[arg(short, long)]
        listen: SocketAddr,
        /// Server the relay forwards to.
        #[arg(short, long)]
        upstream: SocketAddr,
        /// Drop probability (0.0 to 1.0).
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Duplication probability (0.0 to 1.0).
        #[arg(long, default_value_t = 0.0)]
        duplicate: f64,
        /// Reorder probability (0.0 to 1.0).
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Delay applied to reordered datagrams, in milliseconds.
        #[arg(long, default_value_t = 20)]
        reorder_delay_ms: u64,
        /// RNG seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Apply faults to data segments only.
        #[arg(long)]
        data_only: bool,
    },
}

/// Transport tuning flags.  Zero means "use the default".
#[derive(Args)]
struct TransportArgs {
    /// Maximum payload bytes per segment.
    #[arg(long, default_value_t = 0)]
    mss: usize,
    /// Maximum segments in flight.
    #[arg(long, default_value_t = 0)]
    window: usize,
    /// Base retransmission interval in milliseconds.
    #[arg(long, default_value_t = 0)]
    rto_ms: u64,
    /// Retransmission interval ceiling in milliseconds.
    #[arg(long, default_value_t = 0)]
    max_rto_ms: u64,
    /// Retransmissions before giving up.
    #[arg(long, default_value_t = 0)]
    retries: u32,
    /// Delayed-ACK interval in milliseconds (0 acknowledges immediately).
    #[arg(long, default_value_t = 5)]
    ack_delay_ms: u64,
    /// Receive buffer capacity in bytes.
    #[arg(long, default_value_t = 0)]
    recv_buf: usize,
    /// Send buffer capacity in bytes.
    #[arg(long, default_value_t = 0)]
    send_buf: usize,
    /// Handshake deadline in milliseconds.
    #[arg(long, default_value_t = 5000)]
    handshake_timeout_ms: u64,
}

impl TransportArgs {
    fn config(&self) -> Config {
        Config {
            max_segment_size: self.mss,
            max_window_packets: self.window,
            retransmit_interval: Duration::from_millis(self.rto_ms),
            max_retransmit_interval: Duration::from_millis(self.max_rto_ms),
            retransmit_limit: self.retries,
            ack_delay: Duration::from_millis(self.ack_delay_ms),
            recv_buffer_bytes: self.recv_buf,
            send_buffer_bytes: self.send_buf,
        }
        .normalized()
    }

    fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, transport } => run_server(bind, &transport).await,
        Mode::Client { server, transport } => run_client(server, &transport).await,
        Mode::Relay {
            listen,
            upstream,
            loss,
            duplicate,
            reorder,
            reorder_delay_ms,
            seed,
            data_only,
        } => {
            let config = SimulatorConfig {
                loss_rate: loss,
                duplicate_rate: duplicate,
                reorder_rate: reorder,
                reorder_delay: Duration::from_millis(reorder_delay_ms),
                seed,
                data_only,
            };
            let sim = Simulator::start(listen, upstream, config)
                .await
                .context("failed to start relay")?;
            tokio::signal::ctrl_c().await?;
            log::info!("relay stats: {:?}", sim.stats());
            Ok(())
        }
    }
}

async fn run_server(bind: SocketAddr, transport: &TransportArgs) -> anyhow::Result<()> {
    let listener = Listener::listen(bind, transport.config(), transport.handshake_timeout())
        .await
        .with_context(|| format!("failed to listen on {bind}"))?;
    log::info!("Starting server on {}", listener.local_addr());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            res = listener.accept() => {
                let conn = res?;
                log::info!("accepted {}", conn.remote_endpoint());
                tokio::spawn(echo(conn));
            }
        }
    }
    listener.close().await;
    Ok(())
}

async fn echo(conn: Connection) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = conn.write(&buf[..n]).await {
                    log::warn!("echo to {} failed: {e}", conn.remote_endpoint());
                    break;
                }
            }
            Err(e) => {
                log::warn!("read from {} failed: {e}", conn.remote_endpoint());
                break;
            }
        }
    }
    log::info!("{} disconnected", conn.remote_endpoint());
    conn.close().await;
}

/// Copy echoed bytes from `conn` to `out` until as many have arrived as
/// `sent` eventually reports, or the stream ends.  Returns the byte count.
async fn print_echoes<W>(
    conn: Connection,
    mut out: W,
    mut sent: watch::Receiver<Option<usize>>,
) -> usize
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    let mut received = 0;
    loop {
        if let Some(total) = *sent.borrow() {
            if received >= total {
                break;
            }
        }
        tokio::select! {
            res = conn.read(&mut buf) => match res {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    received += n;
                    if out.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    let _ = out.flush().await;
                }
            },
            changed = sent.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    received
}

/// How long the client waits for outstanding echoes after stdin ends.
const ECHO_DRAIN: Duration = Duration::from_secs(5);

async fn run_client(server: Endpoint, transport: &TransportArgs) -> anyhow::Result<()> {
    log::info!("Starting client, connecting to {server}");
    let conn = Connection::dial_with(
        server,
        transport.config(),
        transport.handshake_timeout(),
        &Default::default(),
    )
    .await
    .with_context(|| format!("failed to connect to {server}"))?;
    let mut errors = conn.take_errors();

    // Total bytes sent, published once stdin is exhausted.
    let (sent_tx, sent_rx) = watch::channel(None::<usize>);
    let printer = tokio::spawn(print_echoes(conn.clone(), tokio::io::stdout(), sent_rx));

    let mut sent = 0;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        sent += conn.write(format!("{line}\n").as_bytes()).await?;
    }
    conn.flush().await?;
    let _ = sent_tx.send(Some(sent));

    match tokio::time::timeout(ECHO_DRAIN, printer).await {
        Ok(Ok(received)) if received < sent => {
            log::warn!("server closed after echoing {received} of {sent} bytes");
        }
        Ok(_) => {}
        Err(_) => log::warn!("gave up waiting for echoes after {ECHO_DRAIN:?}"),
    }
    if let Some(Ok(err)) = errors.as_mut().map(|rx| rx.try_recv()) {
        log::warn!("connection failed: {err}");
    }
    conn.close().await;
    Ok(())
}
