//! Chunk and acknowledgement codec for reliable datagram delivery.
//!
//! ```text
//! data chunk:  [sequence u64 LE][total_chunks u32 LE][chunk_index u32 LE][payload]
//! ack:         [sequence u64 LE][chunk_index u32 LE]
//! ```
//!
//! An ack is exactly [`ACK_SIZE`] bytes and a chunk is at least
//! [`CHUNK_HEADER_SIZE`] bytes, so a receiver tells them apart by length alone.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Data chunk header size.
pub const CHUNK_HEADER_SIZE: usize = 16;

/// Acknowledgement datagram size.
pub const ACK_SIZE: usize = 12;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Upper bound on chunks per message accepted from the wire.
pub const MAX_CHUNKS_PER_MESSAGE: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub sequence: u64,
    pub total_chunks: u32,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ack {
    pub sequence: u64,
    pub chunk_index: u32,
}

/// A classified inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Ack(Ack),
    Chunk { header: ChunkHeader, payload: Bytes },
}

pub fn encode_chunk(header: ChunkHeader, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(CHUNK_HEADER_SIZE + payload.len());
    dst.put_u64_le(header.sequence);
    dst.put_u32_le(header.total_chunks);
    dst.put_u32_le(header.chunk_index);
    dst.put_slice(payload);
}

pub fn encode_ack(ack: Ack, dst: &mut BytesMut) {
    dst.reserve(ACK_SIZE);
    dst.put_u64_le(ack.sequence);
    dst.put_u32_le(ack.chunk_index);
}

/// Classify a received datagram as an ack or a data chunk.
pub fn classify(datagram: Bytes) -> Result<Datagram> {
    let len = datagram.len();
    if len == ACK_SIZE {
        let mut buf = datagram;
        return Ok(Datagram::Ack(Ack {
            sequence: buf.get_u64_le(),
            chunk_index: buf.get_u32_le(),
        }));
    }
    if len < CHUNK_HEADER_SIZE {
        return Err(FrameError::MalformedDatagram { len });
    }

    let mut head = datagram.slice(..CHUNK_HEADER_SIZE);
    let header = ChunkHeader {
        sequence: head.get_u64_le(),
        total_chunks: head.get_u32_le(),
        chunk_index: head.get_u32_le(),
    };
    validate_header(&header)?;

    Ok(Datagram::Chunk {
        header,
        payload: datagram.slice(CHUNK_HEADER_SIZE..),
    })
}

fn validate_header(header: &ChunkHeader) -> Result<()> {
    let reason = if header.total_chunks == 0 {
        "zero chunk count"
    } else if header.total_chunks > MAX_CHUNKS_PER_MESSAGE {
        "chunk count over limit"
    } else if header.chunk_index >= header.total_chunks {
        "chunk index out of range"
    } else {
        return Ok(());
    };
    Err(FrameError::InvalidChunkHeader {
        sequence: header.sequence,
        reason,
    })
}

/// Payload bytes that fit in one chunk for a given datagram size.
pub fn chunk_payload_capacity(max_packet_size: usize) -> Result<usize> {
    if max_packet_size <= CHUNK_HEADER_SIZE {
        return Err(FrameError::PacketSizeTooSmall {
            size: max_packet_size,
            min: CHUNK_HEADER_SIZE + 1,
        });
    }
    Ok(max_packet_size.min(MAX_DATAGRAM_SIZE) - CHUNK_HEADER_SIZE)
}

/// Split `payload` into encoded chunk datagrams for `sequence`.
///
/// An empty payload still produces one (empty) chunk so the receiver
/// delivers an empty message.
pub fn split_into_chunks(sequence: u64, payload: &[u8], max_packet_size: usize) -> Result<Vec<Bytes>> {
    let capacity = chunk_payload_capacity(max_packet_size)?;
    let total = payload.len().div_ceil(capacity).max(1);
    if total > MAX_CHUNKS_PER_MESSAGE as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: capacity * MAX_CHUNKS_PER_MESSAGE as usize,
        });
    }

    let total_chunks = total as u32;
    let mut chunks = Vec::with_capacity(total);
    for chunk_index in 0..total_chunks {
        let start = chunk_index as usize * capacity;
        let end = (start + capacity).min(payload.len());
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + (end - start));
        encode_chunk(
            ChunkHeader {
                sequence,
                total_chunks,
                chunk_index,
            },
            &payload[start..end],
            &mut buf,
        );
        chunks.push(buf.freeze());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_bytes(sequence: u64, chunk_index: u32) -> Bytes {
        let mut buf = BytesMut::new();
        encode_ack(
            Ack {
                sequence,
                chunk_index,
            },
            &mut buf,
        );
        buf.freeze()
    }

    #[test]
    fn ack_is_exactly_twelve_bytes() {
        let bytes = ack_bytes(7, 3);
        assert_eq!(bytes.len(), ACK_SIZE);
        assert_eq!(
            classify(bytes).unwrap(),
            Datagram::Ack(Ack {
                sequence: 7,
                chunk_index: 3
            })
        );
    }

    #[test]
    fn sequence_uses_all_eight_bytes() {
        let sequence = u64::MAX - 1;
        let chunks = split_into_chunks(sequence, b"x", 64).unwrap();
        match classify(chunks[0].clone()).unwrap() {
            Datagram::Chunk { header, .. } => assert_eq!(header.sequence, sequence),
            other => panic!("expected chunk, got {other:?}"),
        }
        match classify(ack_bytes(sequence, 0)).unwrap() {
            Datagram::Ack(ack) => assert_eq!(ack.sequence, sequence),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn split_respects_packet_size() {
        let payload: Vec<u8> = (0..100u8).collect();
        let chunks = split_into_chunks(1, &payload, CHUNK_HEADER_SIZE + 30).unwrap();

        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_HEADER_SIZE + 30));

        let mut rebuilt = Vec::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            match classify(chunk).unwrap() {
                Datagram::Chunk { header, payload } => {
                    assert_eq!(header.total_chunks, 4);
                    assert_eq!(header.chunk_index, i as u32);
                    rebuilt.extend_from_slice(&payload);
                }
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn empty_payload_is_one_empty_chunk() {
        let chunks = split_into_chunks(9, b"", 1400).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), CHUNK_HEADER_SIZE);
    }

    #[test]
    fn short_datagrams_are_malformed() {
        for len in [0usize, 5, 11, 13, 15] {
            let err = classify(Bytes::from(vec![0u8; len])).unwrap_err();
            assert!(matches!(err, FrameError::MalformedDatagram { .. }), "len {len}");
        }
    }

    #[test]
    fn inconsistent_headers_are_rejected() {
        let mut buf = BytesMut::new();
        encode_chunk(
            ChunkHeader {
                sequence: 1,
                total_chunks: 2,
                chunk_index: 2,
            },
            b"data",
            &mut buf,
        );
        assert!(matches!(
            classify(buf.freeze()),
            Err(FrameError::InvalidChunkHeader { sequence: 1, .. })
        ));

        let mut buf = BytesMut::new();
        encode_chunk(
            ChunkHeader {
                sequence: 2,
                total_chunks: 0,
                chunk_index: 0,
            },
            b"",
            &mut buf,
        );
        assert!(classify(buf.freeze()).is_err());
    }

    #[test]
    fn packet_size_must_leave_room_for_payload() {
        assert!(split_into_chunks(1, b"abc", CHUNK_HEADER_SIZE).is_err());
        assert_eq!(chunk_payload_capacity(1400).unwrap(), 1384);
    }
}
