//! Named in-process channels shared by [`InMemoryTransport`](crate::InMemoryTransport)s.
//!
//! A registry is an explicit value: transports built with clones of the same
//! registry see the same channels. Every attached transport competes for the
//! messages of its channel, including the ones it sent itself.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Result, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub payload: Bytes,
    pub priority: u32,
    pub enqueued_at: Instant,
}

/// A bounded queue of pending messages.
#[derive(Debug)]
pub struct Channel {
    id: String,
    capacity: usize,
    queue: Mutex<VecDeque<QueuedMessage>>,
    signal: Notify,
    attached: AtomicUsize,
}

impl Channel {
    fn new(id: &str, capacity: usize) -> Self {
        Self {
            id: id.to_string(),
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            signal: Notify::new(),
            attached: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages waiting to be drained.
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transports currently attached.
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    /// Append a message and wake one consumer.
    pub fn enqueue(&self, payload: Bytes, priority: u32) -> Result<()> {
        {
            let mut queue = lock(&self.queue);
            if queue.len() >= self.capacity {
                return Err(TransportError::QueueFull {
                    channel: self.id.clone(),
                    capacity: self.capacity,
                });
            }
            queue.push_back(QueuedMessage {
                payload,
                priority,
                enqueued_at: Instant::now(),
            });
        }
        self.signal.notify_one();
        Ok(())
    }

    pub(crate) fn drain(&self) -> Vec<QueuedMessage> {
        lock(&self.queue).drain(..).collect()
    }

    pub(crate) async fn wait_for_enqueue(&self) {
        self.signal.notified().await;
    }
}

/// Process-local lookup of channels by id.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<Mutex<HashMap<String, Arc<Channel>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a channel, creating it with `capacity` if absent.
    ///
    /// A channel created here stays registered until a transport attaches
    /// and the last one detaches.
    pub fn get_or_create(&self, id: &str, capacity: usize) -> Arc<Channel> {
        let mut channels = lock(&self.channels);
        Self::entry(&mut channels, id, capacity)
    }

    fn entry(
        channels: &mut HashMap<String, Arc<Channel>>,
        id: &str,
        capacity: usize,
    ) -> Arc<Channel> {
        Arc::clone(channels.entry(id.to_string()).or_insert_with(|| {
            debug!(channel = id, capacity, "channel created");
            Arc::new(Channel::new(id, capacity))
        }))
    }

    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        lock(&self.channels).get(id).cloned()
    }

    /// Count one more transport on `id`. The count changes under the map lock,
    /// so a concurrent last detach cannot remove the channel being attached.
    pub(crate) fn attach(&self, id: &str, capacity: usize) -> Arc<Channel> {
        let mut channels = lock(&self.channels);
        let channel = Self::entry(&mut channels, id, capacity);
        channel.attached.fetch_add(1, Ordering::SeqCst);
        channel
    }

    /// Drop one attachment; the channel is removed when none remain.
    pub(crate) fn detach(&self, channel: &Arc<Channel>) {
        let mut channels = lock(&self.channels);
        let remaining = channel
            .attached
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        if remaining > 0 {
            return;
        }
        let registered = channels
            .get(channel.id())
            .is_some_and(|current| Arc::ptr_eq(current, channel));
        if registered {
            channels.remove(channel.id());
            debug!(channel = channel.id(), "channel removed");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.channels).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
