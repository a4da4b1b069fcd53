/// Errors that can occur while encoding or decoding hostlink wire data.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A datagram is neither an acknowledgement nor a data chunk.
    #[error("malformed datagram ({len} bytes)")]
    MalformedDatagram { len: usize },

    /// A chunk header carries inconsistent counters.
    #[error("invalid chunk header for sequence {sequence}: {reason}")]
    InvalidChunkHeader { sequence: u64, reason: &'static str },

    /// A chunk disagrees with earlier chunks of the same sequence about the chunk count.
    #[error("chunk count mismatch for sequence {sequence} (expected {expected}, got {actual})")]
    ChunkCountMismatch {
        sequence: u64,
        expected: u32,
        actual: u32,
    },

    /// The datagram size leaves no room for chunk payload.
    #[error("packet size {size} too small (minimum {min})")]
    PacketSizeTooSmall { size: usize, min: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
