//! Wire codecs for hostlink transports.
//!
//! Two framings live here:
//! - Stream framing: every message is an 8-byte little-endian length prefix
//!   followed by the payload. Readers accumulate payloads chunk by chunk, so
//!   callers always get complete messages regardless of how the stream is split.
//! - Datagram framing: reliable UDP splits a message into chunks carrying a
//!   16-byte header (sequence, chunk count, chunk index) and acknowledges each
//!   chunk with a 12-byte datagram (sequence, chunk index).
//!
//! No sockets here; transports own the I/O handles and drive these codecs.

pub mod codec;
pub mod datagram;
pub mod error;
pub mod reader;
pub mod reassembly;
pub mod writer;

pub use codec::{
    decode_prefix, encode_frame, encode_prefix, FrameConfig, StreamCodec, DEFAULT_CHUNK_SIZE,
    PREFIX_SIZE,
};
pub use datagram::{
    chunk_payload_capacity, classify, encode_ack, encode_chunk, split_into_chunks, Ack,
    ChunkHeader, Datagram, ACK_SIZE, CHUNK_HEADER_SIZE, MAX_CHUNKS_PER_MESSAGE,
    MAX_DATAGRAM_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use reassembly::ReassemblyBuffer;
pub use writer::FrameWriter;
