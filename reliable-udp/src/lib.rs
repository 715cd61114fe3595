//! `reliable-udp`: a TCP-like reliable byte stream implemented over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  segments   ┌──────────────┐
//!  │ SendWindow │────────────▶│ ReceiveWindow│
//!  └─────┬──────┘             └──────┬───────┘
//!        │        cumulative ACKs    │
//!        │◀──────────────────────────┘
//!        │
//!  ┌─────▼──────────────────────────────────┐
//!  │              Connection                │
//!  │ (handshake, state machine, timers)     │
//!  └─────┬──────────────────────────▲───────┘
//!        │ Link (owned or shared)   │ Listener demux
//!  ┌─────▼──────────────────────────┴───────┐
//!  │ Socket (async wrapper around UdpSocket)│
//!  └────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`config`]: tuning parameters and their normalization
//! - [`error`]: connection-level error type
//! - [`endpoint`]: peer address labels
//! - [`ring_buffer`]: bounded byte FIFO used by both directions
//! - [`sender`]: send window, fragmentation, retransmission state
//! - [`receiver`]: in-order delivery and out-of-order parking
//! - [`state`]: finite-state-machine types
//! - [`timer`]: one-shot timers and back-off
//! - [`socket`]: async UDP socket abstraction and socket ownership
//! - [`connection`]: per-connection lifecycle and data transfer
//! - [`handshake`]: client and server three-way handshake
//! - [`listener`]: shared-socket demultiplexer and accept queue
//! - [`simulator`]: lossy/reordering relay for testing

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
mod handshake;
pub mod listener;
pub mod packet;
pub mod receiver;
pub mod ring_buffer;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use connection::{Connection, DEFAULT_HANDSHAKE_TIMEOUT};
pub use endpoint::Endpoint;
pub use error::ConnError;
pub use listener::Listener;
pub use state::ConnectionState;
