//! In-process transport over a named [`Channel`].
//!
//! Never touches the network or filesystem. A background loop drains the
//! channel on every enqueue signal (or each poll interval), drops expired
//! messages, and delivers in arrival order, by descending priority, or as
//! concatenated batches depending on settings.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::event::EventHub;
use crate::link::{LinkCore, SessionContext};
use crate::metrics::MetricsSnapshot;
use crate::registry::{Channel, ChannelRegistry, QueuedMessage};
use crate::settings::InMemorySettings;
use crate::state::ConnectionState;
use crate::traits::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport bound to one channel of a [`ChannelRegistry`].
pub struct InMemoryTransport {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    core: LinkCore,
    settings: InMemorySettings,
    channel_id: String,
    registry: ChannelRegistry,
    channel: Mutex<Option<Arc<Channel>>>,
}

/// Messages accumulated in batching mode.
#[derive(Default)]
struct Batch {
    payloads: Vec<Bytes>,
    started: Option<Instant>,
}

impl Batch {
    fn push(&mut self, payload: Bytes) {
        self.started.get_or_insert_with(Instant::now);
        self.payloads.push(payload);
    }

    fn take(&mut self) -> Bytes {
        self.started = None;
        let total = self.payloads.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for payload in self.payloads.drain(..) {
            joined.extend_from_slice(&payload);
        }
        joined.freeze()
    }
}

impl InMemoryTransport {
    /// Create a transport for `channel_id`. Must be called inside a tokio runtime.
    pub fn new(
        channel_id: impl Into<String>,
        settings: InMemorySettings,
        registry: ChannelRegistry,
    ) -> Result<Self> {
        settings.validate()?;
        let channel_id = channel_id.into();
        if channel_id.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "channel id must not be empty".to_string(),
            ));
        }

        let core = LinkCore::new("in_memory", &settings.base)?;
        Ok(Self {
            inner: Arc::new(MemoryInner {
                core,
                settings,
                channel_id,
                registry,
                channel: Mutex::new(None),
            }),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    pub fn settings(&self) -> &InMemorySettings {
        &self.inner.settings
    }

    /// Enqueue `data` with an explicit priority (`0..max_priority_levels`, higher first).
    pub async fn send_with_priority(&self, data: &[u8], priority: u32) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        if priority >= inner.settings.max_priority_levels {
            return Err(TransportError::InvalidArgument(format!(
                "priority {priority} outside 0..{}",
                inner.settings.max_priority_levels
            )));
        }
        if !inner.core.is_open() {
            return Ok(false);
        }
        let Some(channel) = lock(&inner.channel).clone() else {
            return Ok(false);
        };

        let _permit = inner.core.acquire_send().await?;
        let started = Instant::now();
        match channel.enqueue(Bytes::copy_from_slice(data), priority) {
            Ok(()) => {
                inner
                    .core
                    .metrics()
                    .record_send(data.len(), started.elapsed());
                if inner.core.trace_frames() {
                    debug!(channel = %inner.channel_id, len = data.len(), priority, "message enqueued");
                }
                Ok(true)
            }
            Err(err) => {
                inner.core.metrics().record_send_failure();
                inner.core.report_error(err);
                Ok(false)
            }
        }
    }
}

impl MemoryInner {
    fn detach(&self) {
        if let Some(channel) = lock(&self.channel).take() {
            self.registry.detach(&channel);
        }
    }

    fn without_expired(&self, mut drained: Vec<QueuedMessage>) -> Vec<QueuedMessage> {
        if !self.settings.enable_message_expiry {
            return drained;
        }
        let ttl = self.settings.message_ttl();
        let before = drained.len();
        drained.retain(|message| message.enqueued_at.elapsed() <= ttl);
        let expired = before - drained.len();
        if expired > 0 {
            debug!(channel = %self.channel_id, expired, "dropped expired messages");
        }
        drained
    }

    fn dispatch(&self, mut drained: Vec<QueuedMessage>, batch: &mut Batch) {
        if self.settings.enable_batching {
            for message in drained {
                batch.push(message.payload);
                if batch.payloads.len() >= self.settings.batch_size {
                    self.core.deliver(batch.take());
                }
            }
            return;
        }

        if self.settings.enable_priority {
            drained.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        for message in drained {
            self.core.deliver(message.payload);
        }
    }

    async fn run_loop(self: Arc<Self>, channel: Arc<Channel>, ctx: SessionContext) {
        let poll_interval = self.settings.poll_interval();
        let batch_timeout = self.settings.batch_timeout();
        let mut batch = Batch::default();

        loop {
            let drained = self.without_expired(channel.drain());
            if !drained.is_empty() {
                self.dispatch(drained, &mut batch);
            }

            let mut wait = poll_interval;
            if let Some(started) = batch.started {
                let elapsed = started.elapsed();
                if elapsed >= batch_timeout {
                    self.core.deliver(batch.take());
                } else {
                    wait = wait.min(batch_timeout - elapsed);
                }
            }

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                _ = channel.wait_for_enqueue() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        if !batch.payloads.is_empty() {
            debug!(
                channel = %self.channel_id,
                dropped = batch.payloads.len(),
                "partial batch discarded on shutdown"
            );
        }
        debug!(channel = %self.channel_id, "in-memory loop stopped");
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn kind(&self) -> &'static str {
        self.inner.core.kind()
    }

    fn state(&self) -> ConnectionState {
        self.inner.core.state()
    }

    fn is_connected(&self) -> bool {
        self.inner.core.is_open()
    }

    fn events(&self) -> &EventHub {
        self.inner.core.events()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.inner.core.metrics().snapshot()
    }

    fn runtime(&self) -> &Handle {
        self.inner.core.runtime()
    }

    async fn connect(&self) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        let _ops = inner.core.lock_ops().await;
        inner.core.ensure_live()?;
        if inner.core.state() == ConnectionState::Open {
            return Ok(true);
        }

        inner.core.stop_session().await;
        inner.core.set_state(ConnectionState::Connecting);
        let channel = inner
            .registry
            .attach(&inner.channel_id, inner.settings.queue_capacity);
        *lock(&inner.channel) = Some(Arc::clone(&channel));

        let loop_inner = Arc::clone(inner);
        inner
            .core
            .start_session(move |ctx| loop_inner.run_loop(channel, ctx));
        inner.core.mark_open();
        info!(channel = %inner.channel_id, "in-memory channel attached");
        Ok(true)
    }

    async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.core.ensure_live()?;
        let _ops = inner.core.lock_ops().await;
        let previous = inner.core.state();
        inner.core.stop_session().await;
        inner.detach();
        inner.core.clear_inbox();
        inner.core.mark_closed(previous);
        if previous != ConnectionState::Closed {
            info!(channel = %inner.channel_id, "in-memory channel detached");
        }
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<bool> {
        self.send_with_priority(data, 0).await
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        self.inner.core.receive().await
    }

    async fn dispose(&self) {
        let inner = &self.inner;
        if !inner.core.begin_dispose() {
            return;
        }
        let _ops = inner.core.lock_ops().await;
        let previous = inner.core.state();
        inner.core.stop_session().await;
        inner.detach();
        inner.core.clear_inbox();
        inner.core.mark_closed(previous);
        debug!(channel = %inner.channel_id, "in-memory transport disposed");
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        self.inner.core.cancel_all();
        self.inner.detach();
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("channel_id", &self.inner.channel_id)
            .field("state", &self.inner.core.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_concatenates_in_order() {
        let mut batch = Batch::default();
        batch.push(Bytes::from_static(b"ab"));
        batch.push(Bytes::from_static(b"cd"));
        assert!(batch.started.is_some());

        assert_eq!(batch.take().as_ref(), b"abcd");
        assert!(batch.payloads.is_empty());
        assert!(batch.started.is_none());
    }

    #[tokio::test]
    async fn priority_outside_levels_is_rejected() {
        let transport = InMemoryTransport::new(
            "levels",
            InMemorySettings::default(),
            ChannelRegistry::new(),
        )
        .expect("transport should build");
        transport.connect().await.unwrap();

        assert!(matches!(
            transport.send_with_priority(b"x", 3).await,
            Err(TransportError::InvalidArgument(_))
        ));
        assert!(transport.send_with_priority(b"x", 2).await.unwrap());
    }

    #[tokio::test]
    async fn conflicting_modes_fail_construction() {
        let settings = InMemorySettings {
            enable_priority: true,
            enable_batching: true,
            ..InMemorySettings::default()
        };
        assert!(matches!(
            InMemoryTransport::new("both", settings, ChannelRegistry::new()),
            Err(TransportError::Settings(_))
        ));
    }
}
