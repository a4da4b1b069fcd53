use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::datagram::ChunkHeader;
use crate::error::{FrameError, Result};

/// Collects the chunks of one sequence until every slot is filled.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    sequence: u64,
    slots: Vec<Option<Bytes>>,
    filled: usize,
    started_at: Instant,
}

impl ReassemblyBuffer {
    pub fn new(sequence: u64, total_chunks: u32) -> Self {
        Self {
            sequence,
            slots: vec![None; total_chunks as usize],
            filled: 0,
            started_at: Instant::now(),
        }
    }

    /// Store a chunk. Returns `Ok(false)` for a duplicate of an already filled slot.
    pub fn insert(&mut self, header: &ChunkHeader, payload: Bytes) -> Result<bool> {
        if header.sequence != self.sequence || header.total_chunks as usize != self.slots.len() {
            return Err(FrameError::ChunkCountMismatch {
                sequence: header.sequence,
                expected: self.slots.len() as u32,
                actual: header.total_chunks,
            });
        }

        let slot = self
            .slots
            .get_mut(header.chunk_index as usize)
            .ok_or(FrameError::InvalidChunkHeader {
                sequence: header.sequence,
                reason: "chunk index out of range",
            })?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(payload);
        self.filled += 1;
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time since the first chunk arrived.
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Concatenate the chunks in index order.
    ///
    /// Returns `None` while any slot is still empty.
    pub fn assemble(self) -> Option<Bytes> {
        if !self.is_complete() {
            return None;
        }
        if self.slots.len() == 1 {
            return self.slots.into_iter().next().flatten();
        }

        let total: usize = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for chunk in self.slots.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        Some(out.freeze())
    }
}
