use std::fmt;

use serde::Serialize;

/// Lifecycle state of a transport instance.
///
/// `Closed → Connecting → Open → Closed`, with `Connecting` re-entered while
/// the reconnection policy tries to reopen a lost link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        };
        f.write_str(name)
    }
}

/// Why a link went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Unknown,
    /// The peer closed the stream cleanly.
    Normal,
    Timeout,
    NetworkError,
    ProtocolError,
    PeerGone,
    /// The reconnection policy used up every attempt.
    RetriesExhausted,
    /// A write failed mid-send.
    TransmissionError,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Normal => "normal",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ProtocolError => "protocol_error",
            Self::PeerGone => "peer_gone",
            Self::RetriesExhausted => "retries_exhausted",
            Self::TransmissionError => "transmission_error",
        };
        f.write_str(name)
    }
}
