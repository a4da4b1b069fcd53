use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{FrameError, Result};

/// Stream frame prefix: payload length as u64 little-endian.
pub const PREFIX_SIZE: usize = 8;

/// Default chunk size for reading and writing payloads: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for the stream codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest slice of payload written or reserved at once. Default: 64 KiB.
    pub chunk_size: usize,
    /// Optional upper bound on a single frame's payload length.
    pub max_frame_len: Option<usize>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_len: None,
        }
    }
}

impl FrameConfig {
    /// Config whose chunk size follows a transport's maximum message size.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..Self::default()
        }
    }
}

/// Encode the length prefix for a payload of `len` bytes.
pub fn encode_prefix(len: usize) -> [u8; PREFIX_SIZE] {
    (len as u64).to_le_bytes()
}

/// Decode a length prefix from the front of `src`.
///
/// Returns `Ok(None)` if fewer than [`PREFIX_SIZE`] bytes are buffered.
/// On success the prefix bytes are consumed.
pub fn decode_prefix(src: &mut BytesMut, max_frame_len: Option<usize>) -> Result<Option<usize>> {
    if src.len() < PREFIX_SIZE {
        return Ok(None);
    }

    let claimed = src.get_u64_le();
    let limit = max_frame_len.unwrap_or(usize::MAX);
    match usize::try_from(claimed) {
        Ok(len) if len <= limit => Ok(Some(len)),
        _ => Err(FrameError::PayloadTooLarge {
            size: usize::try_from(claimed).unwrap_or(usize::MAX),
            max: limit,
        }),
    }
}

/// Encode a complete frame into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────────────────┐
/// │ Length (8B LE, u64)  │ Payload          │
/// │                      │ (Length bytes)   │
/// └──────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(PREFIX_SIZE + payload.len());
    dst.put_u64_le(payload.len() as u64);
    dst.put_slice(payload);
}

/// Incremental decoder for length-prefixed stream frames.
///
/// Buffer growth is bounded by the configured chunk size: a frame that
/// claims a huge length is accumulated as bytes arrive, never allocated
/// up front.
#[derive(Debug, Clone)]
pub struct StreamCodec {
    config: FrameConfig,
    pending: Option<usize>,
}

impl StreamCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            pending: None,
        }
    }

    /// Payload length of the partially received frame, if any.
    pub fn pending_len(&self) -> Option<usize> {
        self.pending
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

impl Decoder for StreamCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let len = match self.pending {
            Some(len) => len,
            None => match decode_prefix(src, self.config.max_frame_len)? {
                Some(len) => {
                    tracing::trace!(len, "decoded frame prefix");
                    self.pending = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if src.len() < len {
            let wanted = (len - src.len()).min(self.config.chunk_size);
            src.reserve(wanted);
            return Ok(None);
        }

        self.pending = None;
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}
