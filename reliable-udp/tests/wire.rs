//! Wire-level tests: a raw `UdpSocket` plays one side of the conversation
//! with hand-built segments so the exact traffic can be inspected.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use reliable_udp::packet::{flags, Segment};
use reliable_udp::{Config, ConnError, Connection, ConnectionState, Endpoint, Listener};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(5);
const CLIENT_ISN: u32 = 1000;
const SERVER_ISN: u32 = 5000;

fn ephemeral() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn send(sock: &UdpSocket, to: SocketAddr, segment: &Segment) {
    sock.send_to(&segment.encode().unwrap(), to).await.unwrap();
}

/// Next decodable segment, or `None` once the socket stays quiet for `quiet`.
async fn recv(sock: &UdpSocket, quiet: Duration) -> Option<(Segment, SocketAddr)> {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (n, from) = tokio::time::timeout(quiet, sock.recv_from(&mut buf))
            .await
            .ok()?
            .ok()?;
        if let Ok(segment) = Segment::decode(&buf[..n]) {
            return Some((segment, from));
        }
    }
}

/// Everything that arrives until the socket stays quiet for `quiet`.
async fn drain(sock: &UdpSocket, quiet: Duration) -> Vec<Segment> {
    let mut out = Vec::new();
    while let Some((segment, _)) = recv(sock, quiet).await {
        out.push(segment);
    }
    out
}

/// A hand-driven client that has completed the handshake with a listener.
struct RawClient {
    sock: UdpSocket,
    server: SocketAddr,
    /// Sequence number of our next payload byte.
    seq: u32,
    /// What we acknowledge: the server's next sequence number.
    ack: u32,
}

impl RawClient {
    async fn connect(listener: &Listener) -> (RawClient, Connection) {
        let sock = UdpSocket::bind(ephemeral()).await.unwrap();
        let server = listener.local_addr();

        send(&sock, server, &Segment::control(flags::SYN, CLIENT_ISN, 0, 0)).await;
        let syn_ack = loop {
            let (segment, _) = recv(&sock, WAIT).await.expect("no SYN|ACK");
            if segment.has(flags::SYN | flags::ACK) {
                break segment;
            }
        };
        assert_eq!(syn_ack.header.ack, CLIENT_ISN.wrapping_add(1));
        let ack = syn_ack.header.seq.wrapping_add(1);
        send(
            &sock,
            server,
            &Segment::control(flags::ACK, CLIENT_ISN.wrapping_add(1), ack, 0),
        )
        .await;

        let conn = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("accept timed out")
            .unwrap();
        let client = RawClient {
            sock,
            server,
            seq: CLIENT_ISN.wrapping_add(1),
            ack,
        };
        (client, conn)
    }

    fn data(&self, offset: u32, payload: &[u8]) -> Segment {
        Segment::data(self.seq.wrapping_add(offset), self.ack, 1024, payload.to_vec())
    }

    async fn send(&self, segment: &Segment) {
        send(&self.sock, self.server, segment).await;
    }
}

async fn listen(config: Config) -> Listener {
    Listener::listen(ephemeral(), config, Duration::from_secs(2))
        .await
        .unwrap()
}

async fn read_exact(conn: &Connection, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    while out.len() < len {
        let n = tokio::time::timeout(WAIT, conn.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert!(n > 0);
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Answer the first SYN on `raw` with a SYN|ACK and return the dialer's
/// address together with its initial sequence number.
async fn answer_syn(raw: &UdpSocket) -> (SocketAddr, u32) {
    let (syn, from) = loop {
        let (segment, from) = recv(raw, WAIT).await.expect("no SYN");
        if segment.has(flags::SYN) && !segment.has(flags::ACK) {
            break (segment, from);
        }
    };
    let isn = syn.header.seq;
    send(
        raw,
        from,
        &Segment::control(flags::SYN | flags::ACK, SERVER_ISN, isn.wrapping_add(1), 0),
    )
    .await;
    (from, isn)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_segments_are_delivered_once() {
    let listener = listen(Config::default()).await;
    let (raw, conn) = RawClient::connect(&listener).await;

    let first = raw.data(0, b"abc");
    raw.send(&first).await;
    raw.send(&first).await;
    raw.send(&raw.data(3, b"def")).await;
    raw.send(&first).await;

    assert_eq!(read_exact(&conn, 6).await, b"abcdef");
    let mut buf = [0u8; 16];
    let extra = tokio::time::timeout(Duration::from_millis(200), conn.read(&mut buf)).await;
    assert!(extra.is_err(), "duplicate bytes were delivered");
}

#[tokio::test]
async fn out_of_order_segments_are_reassembled() {
    let listener = listen(Config::default()).await;
    let (raw, conn) = RawClient::connect(&listener).await;

    raw.send(&raw.data(6, b"ghi")).await;
    raw.send(&raw.data(3, b"def")).await;
    raw.send(&raw.data(0, b"abc")).await;

    assert_eq!(read_exact(&conn, 9).await, b"abcdefghi");
}

#[tokio::test]
async fn overlapping_retransmission_is_trimmed() {
    let listener = listen(Config::default()).await;
    let (raw, conn) = RawClient::connect(&listener).await;

    raw.send(&raw.data(0, b"abcd")).await;
    raw.send(&raw.data(2, b"cdefg")).await;

    assert_eq!(read_exact(&conn, 7).await, b"abcdefg");
}

/// With a long delayed-ACK interval a burst of segments is acknowledged by
/// far fewer pure ACKs than segments, and the last one covers everything.
#[tokio::test]
async fn acks_are_coalesced() {
    let config = Config {
        ack_delay: Duration::from_millis(100),
        ..Config::default()
    };
    let listener = listen(config).await;
    let (raw, conn) = RawClient::connect(&listener).await;

    for i in 0..10u32 {
        raw.send(&raw.data(i * 10, &[b'a' + i as u8; 10])).await;
    }
    let acks: Vec<_> = drain(&raw.sock, Duration::from_millis(400))
        .await
        .into_iter()
        .filter(Segment::is_pure_ack)
        .collect();

    assert!(!acks.is_empty(), "no ACK at all");
    assert!(acks.len() < 10, "{} ACKs for 10 segments", acks.len());
    assert_eq!(acks.last().unwrap().header.ack, raw.seq.wrapping_add(100));
    assert_eq!(read_exact(&conn, 100).await.len(), 100);
}

#[tokio::test]
async fn immediate_ack_when_delay_is_zero() {
    let config = Config {
        ack_delay: Duration::ZERO,
        ..Config::default()
    };
    let listener = listen(config).await;
    let (raw, _conn) = RawClient::connect(&listener).await;

    raw.send(&raw.data(0, b"now")).await;
    let (ack, _) = recv(&raw.sock, Duration::from_millis(50))
        .await
        .expect("ACK was delayed");
    assert!(ack.is_pure_ack());
    assert_eq!(ack.header.ack, raw.seq.wrapping_add(3));
}

/// A peer that never acknowledges: the sender retries exactly
/// `retransmit_limit` times, reports the failure once, and closes.
#[tokio::test]
async fn retransmission_limit_closes_connection() {
    let raw = UdpSocket::bind(ephemeral()).await.unwrap();
    let remote = Endpoint::from(raw.local_addr().unwrap());
    let config = Config {
        retransmit_interval: Duration::from_millis(20),
        max_retransmit_interval: Duration::from_millis(40),
        retransmit_limit: 3,
        ..Config::default()
    };

    let dial = tokio::spawn(Connection::dial(remote, config));
    answer_syn(&raw).await;
    let conn = tokio::time::timeout(WAIT, dial)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let mut errors = conn.take_errors().unwrap();
    assert!(conn.take_errors().is_none());

    conn.write(b"doomed").await.unwrap();
    let data_segments = drain(&raw, Duration::from_millis(500))
        .await
        .into_iter()
        .filter(|s| !s.payload.is_empty())
        .count();
    assert_eq!(data_segments, 4);

    let err = tokio::time::timeout(WAIT, errors.recv()).await.unwrap();
    assert!(matches!(err, Some(ConnError::RetransmissionLimitExceeded)));
    assert!(errors.recv().await.is_none());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(
        conn.write(b"more").await,
        Err(ConnError::ConnectionClosed)
    ));
}

/// The final handshake ACK may be lost; a retransmitted SYN|ACK gets
/// acknowledged again even after the dialer considers itself established.
#[tokio::test]
async fn duplicate_syn_ack_is_reacknowledged() {
    let raw = UdpSocket::bind(ephemeral()).await.unwrap();
    let remote = Endpoint::from(raw.local_addr().unwrap());

    let dial = tokio::spawn(Connection::dial(remote, Config::default()));
    let (client, isn) = answer_syn(&raw).await;
    let conn = tokio::time::timeout(WAIT, dial)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(conn.state(), ConnectionState::Established);

    send(
        &raw,
        client,
        &Segment::control(flags::SYN | flags::ACK, SERVER_ISN, isn.wrapping_add(1), 0),
    )
    .await;
    let acks = drain(&raw, Duration::from_millis(300))
        .await
        .into_iter()
        .filter(|s| s.is_pure_ack() && s.header.ack == SERVER_ISN.wrapping_add(1))
        .count();
    assert!(acks >= 2, "expected the handshake ACK plus a re-ACK, saw {acks}");
}

/// A duplicate SYN during the handshake makes the listener resend the same
/// SYN|ACK, and a data segment may complete the handshake in place of the
/// bare ACK.
#[tokio::test]
async fn listener_tolerates_duplicate_syn_and_data_first_ack() {
    let listener = listen(Config::default()).await;
    let sock = UdpSocket::bind(ephemeral()).await.unwrap();
    let server = listener.local_addr();

    // garbage is ignored
    sock.send_to(b"\x01\x02", server).await.unwrap();

    let syn = Segment::control(flags::SYN, CLIENT_ISN, 0, 0);
    send(&sock, server, &syn).await;
    let (first, _) = recv(&sock, WAIT).await.unwrap();
    send(&sock, server, &syn).await;
    let (second, _) = recv(&sock, WAIT).await.unwrap();
    assert!(first.has(flags::SYN | flags::ACK));
    assert!(second.has(flags::SYN | flags::ACK));
    assert_eq!(first.header.seq, second.header.seq);

    let data = Segment::data(
        CLIENT_ISN.wrapping_add(1),
        first.header.seq.wrapping_add(1),
        1024,
        b"early".to_vec(),
    );
    send(&sock, server, &data).await;

    let conn = tokio::time::timeout(WAIT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_exact(&conn, 5).await, b"early");
}

/// The first SYN vanishes; the retransmission timer sends it again with the
/// same sequence number and the dial still completes.
#[tokio::test]
async fn lost_syn_is_retransmitted() {
    let raw = UdpSocket::bind(ephemeral()).await.unwrap();
    let remote = Endpoint::from(raw.local_addr().unwrap());
    let config = Config {
        retransmit_interval: Duration::from_millis(50),
        ..Config::default()
    };

    let dial = tokio::spawn(Connection::dial(remote, config));
    let (first, _) = recv(&raw, WAIT).await.expect("no SYN");
    assert!(first.has(flags::SYN));

    let (again, from) = recv(&raw, Duration::from_secs(2))
        .await
        .expect("SYN was not retransmitted");
    assert!(again.has(flags::SYN) && !again.has(flags::ACK));
    assert_eq!(again.header.seq, first.header.seq);

    send(
        &raw,
        from,
        &Segment::control(
            flags::SYN | flags::ACK,
            SERVER_ISN,
            again.header.seq.wrapping_add(1),
            0,
        ),
    )
    .await;
    let conn = tokio::time::timeout(WAIT, dial)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(conn.state(), ConnectionState::Established);
}

/// The final ACK never comes; the listener resends its SYN|ACK on its own
/// timer and completes once the ACK finally arrives.
#[tokio::test]
async fn unacknowledged_syn_ack_is_retransmitted() {
    let listener = listen(Config::default()).await;
    let sock = UdpSocket::bind(ephemeral()).await.unwrap();
    let server = listener.local_addr();

    send(&sock, server, &Segment::control(flags::SYN, CLIENT_ISN, 0, 0)).await;
    let (first, _) = recv(&sock, WAIT).await.expect("no SYN|ACK");
    assert!(first.has(flags::SYN | flags::ACK));

    let (again, _) = recv(&sock, Duration::from_secs(2))
        .await
        .expect("SYN|ACK was not retransmitted");
    assert!(again.has(flags::SYN | flags::ACK));
    assert_eq!(again.header.seq, first.header.seq);
    assert_eq!(again.header.ack, CLIENT_ISN.wrapping_add(1));

    send(
        &sock,
        server,
        &Segment::control(
            flags::ACK,
            CLIENT_ISN.wrapping_add(1),
            first.header.seq.wrapping_add(1),
            0,
        ),
    )
    .await;
    let conn = tokio::time::timeout(WAIT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conn.state(), ConnectionState::Established);
}
