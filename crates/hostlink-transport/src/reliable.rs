//! Acknowledgement and reassembly bookkeeping for reliable UDP.
//!
//! Pure state: the UDP transport owns the socket and drives these trackers
//! from its send path, its receive loop and its retransmit tick.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use hostlink_frame::{Ack, ChunkHeader, ReassemblyBuffer};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Result;

/// A reliable send waiting for acknowledgements.
#[derive(Debug)]
pub(crate) struct PendingOutboundPacket {
    chunks: Vec<Bytes>,
    acked: Vec<bool>,
    remaining: usize,
    retries: u32,
    last_sent: Instant,
    done: Option<oneshot::Sender<bool>>,
}

impl PendingOutboundPacket {
    fn complete(&mut self, delivered: bool) {
        if let Some(done) = self.done.take() {
            let _ = done.send(delivered);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// No pending send has this sequence.
    Unknown,
    Duplicate,
    Progress,
    /// Every chunk is now acknowledged; the send has been completed.
    Completed,
}

/// Retransmit work found by one scan.
#[derive(Debug, Default)]
pub(crate) struct RetransmitPlan {
    pub resend: Vec<Bytes>,
    /// Sequences that ran out of retransmissions and were failed.
    pub exhausted: Vec<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct OutboundTracker {
    pending: HashMap<u64, PendingOutboundPacket>,
}

impl OutboundTracker {
    /// Track a send whose chunks have just been transmitted.
    pub fn register(&mut self, sequence: u64, chunks: Vec<Bytes>) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let count = chunks.len();
        self.pending.insert(
            sequence,
            PendingOutboundPacket {
                chunks,
                acked: vec![false; count],
                remaining: count,
                retries: 0,
                last_sent: Instant::now(),
                done: Some(tx),
            },
        );
        rx
    }

    pub fn acknowledge(&mut self, ack: Ack) -> AckOutcome {
        let Some(packet) = self.pending.get_mut(&ack.sequence) else {
            return AckOutcome::Unknown;
        };
        let Some(flag) = packet.acked.get_mut(ack.chunk_index as usize) else {
            return AckOutcome::Unknown;
        };
        if *flag {
            return AckOutcome::Duplicate;
        }

        *flag = true;
        packet.remaining -= 1;
        if packet.remaining > 0 {
            return AckOutcome::Progress;
        }

        if let Some(mut packet) = self.pending.remove(&ack.sequence) {
            packet.complete(true);
        }
        AckOutcome::Completed
    }

    /// Collect unacknowledged chunks whose ack timeout has elapsed.
    ///
    /// A packet that already used `max_retransmissions` is failed and removed
    /// instead of being resent.
    pub fn due(&mut self, now: Instant, ack_timeout: Duration, max_retransmissions: u32) -> RetransmitPlan {
        let mut plan = RetransmitPlan::default();

        for (sequence, packet) in &mut self.pending {
            if now.saturating_duration_since(packet.last_sent) < ack_timeout {
                continue;
            }
            if packet.retries >= max_retransmissions {
                plan.exhausted.push(*sequence);
                continue;
            }

            packet.retries += 1;
            packet.last_sent = now;
            plan.resend.extend(
                packet
                    .chunks
                    .iter()
                    .zip(&packet.acked)
                    .filter(|(_, acked)| !**acked)
                    .map(|(chunk, _)| chunk.clone()),
            );
        }

        for sequence in &plan.exhausted {
            if let Some(mut packet) = self.pending.remove(sequence) {
                packet.complete(false);
            }
        }
        plan
    }

    pub fn retries(&self, sequence: u64) -> Option<u32> {
        self.pending.get(&sequence).map(|packet| packet.retries)
    }

    /// Stop tracking a send without signalling it.
    pub fn forget(&mut self, sequence: u64) {
        self.pending.remove(&sequence);
    }

    /// Fail every pending send.
    pub fn fail_all(&mut self) {
        for (_, mut packet) in self.pending.drain() {
            packet.complete(false);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Result of accepting one data chunk.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    Pending,
    /// Chunk of a message already delivered or already stored.
    Duplicate,
    Complete(Bytes),
}

/// Per-sequence reassembly plus a bounded memory of delivered sequences.
#[derive(Debug)]
pub(crate) struct InboundTracker {
    partial: HashMap<u64, ReassemblyBuffer>,
    completed: VecDeque<u64>,
    completed_set: HashSet<u64>,
    remember: usize,
}

impl InboundTracker {
    pub fn new(remember: usize) -> Self {
        Self {
            partial: HashMap::new(),
            completed: VecDeque::new(),
            completed_set: HashSet::new(),
            remember: remember.max(1),
        }
    }

    pub fn accept(&mut self, header: ChunkHeader, payload: Bytes) -> Result<Inbound> {
        if self.completed_set.contains(&header.sequence) {
            return Ok(Inbound::Duplicate);
        }

        let buffer = self
            .partial
            .entry(header.sequence)
            .or_insert_with(|| ReassemblyBuffer::new(header.sequence, header.total_chunks));
        if !buffer.insert(&header, payload)? {
            return Ok(Inbound::Duplicate);
        }
        if !buffer.is_complete() {
            return Ok(Inbound::Pending);
        }

        let Some(buffer) = self.partial.remove(&header.sequence) else {
            return Ok(Inbound::Pending);
        };
        self.remember_completed(header.sequence);
        Ok(buffer
            .assemble()
            .map(Inbound::Complete)
            .unwrap_or(Inbound::Pending))
    }

    /// Drop partial messages older than `max_age`. Returns how many were dropped.
    pub fn sweep(&mut self, max_age: Duration) -> usize {
        let before = self.partial.len();
        self.partial.retain(|sequence, buffer| {
            let keep = buffer.age() < max_age;
            if !keep {
                debug!(sequence, "discarding stale partial message");
            }
            keep
        });
        before - self.partial.len()
    }

    /// Forget partial messages, keeping the delivered-sequence memory.
    pub fn reset_partial(&mut self) {
        self.partial.clear();
    }

    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    fn remember_completed(&mut self, sequence: u64) {
        if self.completed.len() == self.remember {
            if let Some(oldest) = self.completed.pop_front() {
                self.completed_set.remove(&oldest);
            }
        }
        self.completed.push_back(sequence);
        self.completed_set.insert(sequence);
    }
}
