use std::time::Duration;

use hostlink_frame::FrameError;

/// A settings value rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A size, count or timeout that must be positive is zero.
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    /// A value outside its permitted range.
    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    /// Two options that cannot be enabled together.
    #[error("{first} and {second} are mutually exclusive")]
    Conflict {
        first: &'static str,
        second: &'static str,
    },
}

/// Errors produced by hostlink transports.
///
/// Only `Disposed`, `InvalidArgument`, `Settings` and `NoRuntime` are ever
/// returned from public operations; the rest travel through the error event.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The settings failed validation.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// The transport was used after dispose.
    #[error("{transport} transport has been disposed")]
    Disposed { transport: &'static str },

    /// A caller-supplied argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport was constructed outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Failed to resolve or connect to the remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The connect attempt did not finish in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Failed to bind a local socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to open a serial port.
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        source: std::io::Error,
    },

    /// A send did not complete in time.
    #[error("send timed out after {timeout:?}")]
    SendTimeout { timeout: Duration },

    /// A reliable datagram send was never fully acknowledged.
    #[error("sequence {sequence} not acknowledged after {retransmissions} retransmissions")]
    Unacknowledged { sequence: u64, retransmissions: u32 },

    /// An in-memory channel queue is at capacity.
    #[error("channel {channel} is full (capacity {capacity})")]
    QueueFull { channel: String, capacity: usize },

    /// An I/O error occurred on the underlying resource.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized wire data.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
