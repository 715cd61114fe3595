//! Connection finite-state machine (FSM) types.
//!
//! Transitions live in [`crate::connection`] and [`crate::handshake`]; this
//! module only names the states.  `Listen` belongs to the listener and is
//! never held by an individual connection.
//!
//! ```text
//!  CLOSED ──SYN sent──────▶ SYN_SENT ──────SYN|ACK──▶ ESTABLISHED
//!  CLOSED ──SYN received──▶ SYN_RECEIVED ──ACK──────▶ ESTABLISHED
//!  any ──close / fatal error──▶ CLOSED
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and terminal state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN|ACK.
    SynSent,
    /// SYN received and SYN|ACK sent; waiting for the final ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::SynSent => 1,
            Self::SynReceived => 2,
            Self::Established => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::SynSent,
            2 => Self::SynReceived,
            3 => Self::Established,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
        };
        f.write_str(name)
    }
}
