//! Lifecycle core shared by every transport.
//!
//! A [`LinkCore`] owns the connection state, the event hub, the receive
//! inbox, the instance cancellation token and the one supervised background
//! session. Transports wrap it and add their own I/O handles.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::event::{EventHub, TransportEvent};
use crate::metrics::Metrics;
use crate::reconnect::{ReconnectOutcome, ReconnectPolicy};
use crate::settings::ProtocolSettings;
use crate::state::{ConnectionState, DisconnectReason};

/// Longest wait for a background loop to stop on disconnect or dispose.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The supervised background task of one connection.
struct Session {
    cancel: CancellationToken,
    faults: mpsc::Sender<DisconnectReason>,
    task: JoinHandle<()>,
}

/// Handed to a session's loop: its cancel signal and the fault inbox fed by
/// `LinkCore::report_fault`.
pub(crate) struct SessionContext {
    pub cancel: CancellationToken,
    pub faults: mpsc::Receiver<DisconnectReason>,
}

impl SessionContext {
    /// Discard faults reported against a link that has since been replaced.
    pub fn clear_faults(&mut self) {
        while self.faults.try_recv().is_ok() {}
    }
}

struct Inbox {
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    capacity: usize,
}

impl Inbox {
    fn push(&self, payload: Bytes) -> bool {
        let dropped = {
            let mut queue = lock(&self.queue);
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front().is_some()
            } else {
                false
            };
            queue.push_back(payload);
            dropped
        };
        self.notify.notify_waiters();
        dropped
    }

    fn pop(&self) -> Option<Bytes> {
        lock(&self.queue).pop_front()
    }

    fn clear(&self) {
        lock(&self.queue).clear();
    }
}

pub(crate) struct LinkCore {
    kind: &'static str,
    state: Mutex<ConnectionState>,
    events: EventHub,
    metrics: Metrics,
    inbox: Inbox,
    disposed: AtomicBool,
    reconnecting: AtomicBool,
    root: CancellationToken,
    runtime: Handle,
    sends: Semaphore,
    ops: tokio::sync::Mutex<()>,
    session: Mutex<Option<Session>>,
    policy: ReconnectPolicy,
    receive_timeout: Duration,
    trace_frames: bool,
}

impl LinkCore {
    /// Build a core bound to the current tokio runtime.
    pub fn new(kind: &'static str, settings: &ProtocolSettings) -> Result<Self> {
        let runtime = Handle::try_current()?;
        if settings.enable_compression || settings.enable_encryption {
            warn!(
                transport = kind,
                compression = settings.enable_compression,
                encryption = settings.enable_encryption,
                "compression and encryption are not implemented; flags ignored"
            );
        }

        Ok(Self {
            kind,
            state: Mutex::new(ConnectionState::Closed),
            events: EventHub::new(),
            metrics: Metrics::new(settings.enable_metrics, settings.max_metrics_count),
            inbox: Inbox {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: settings.receive_queue_capacity,
            },
            disposed: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            root: CancellationToken::new(),
            runtime,
            sends: Semaphore::new(settings.max_concurrent_operations),
            ops: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
            policy: ReconnectPolicy::from_settings(settings),
            receive_timeout: settings.receive_timeout(),
            trace_frames: settings.enable_debug_logging,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Cancelled once the instance is disposed or dropped.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    pub fn trace_frames(&self) -> bool {
        self.trace_frames
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.is_disposed()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(TransportError::Disposed {
                transport: self.kind,
            });
        }
        Ok(())
    }

    /// Move to `next`, emitting `StateChanged` only on an actual change.
    pub fn set_state(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return false;
        }

        debug!(transport = self.kind, from = %previous, to = %next, "state changed");
        self.events.emit(TransportEvent::StateChanged(next));
        if next == ConnectionState::Closed {
            self.inbox.notify.notify_waiters();
        }
        true
    }

    /// Announce a freshly opened (or reopened) link.
    pub fn mark_open(&self) {
        self.events.emit(TransportEvent::Connected);
        self.set_state(ConnectionState::Open);
    }

    /// Announce an orderly close; silent when already closed.
    pub fn mark_closed(&self, previous: ConnectionState) {
        if previous != ConnectionState::Closed {
            self.events.emit(TransportEvent::Disconnected);
        }
        self.set_state(ConnectionState::Closed);
    }

    pub fn report_error(&self, err: impl Into<TransportError>) {
        let err = err.into();
        self.metrics.record_error();
        warn!(transport = self.kind, error = %err, "transport error");
        self.events.emit(TransportEvent::Error(Arc::new(err)));
    }

    /// Hand one complete inbound message to observers and the inbox.
    pub fn deliver(&self, payload: Bytes) {
        self.metrics.record_receive(payload.len());
        if self.trace_frames {
            debug!(transport = self.kind, len = payload.len(), "message received");
        }
        self.events.emit(TransportEvent::DataReceived(payload.clone()));
        if self.inbox.push(payload) {
            warn!(transport = self.kind, "receive queue full; dropped oldest message");
        }
    }

    pub fn clear_inbox(&self) {
        self.inbox.clear();
    }

    /// Next buffered message, waiting up to the receive timeout.
    pub async fn receive(&self) -> Result<Option<Bytes>> {
        self.ensure_live()?;
        let deadline = tokio::time::Instant::now() + self.receive_timeout;

        loop {
            let notified = self.inbox.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.inbox.pop() {
                return Ok(Some(payload));
            }
            if self.state() == ConnectionState::Closed || self.is_disposed() {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(self.inbox.pop()),
                _ = self.root.cancelled() => return Ok(None),
            }
        }
    }

    /// Serializes connect, disconnect and dispose.
    pub async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    /// Bound the number of sends in flight.
    pub async fn acquire_send(&self) -> Result<SemaphorePermit<'_>> {
        self.sends.acquire().await.map_err(|_| TransportError::Disposed {
            transport: self.kind,
        })
    }

    /// Spawn the background loop for a new connection, replacing any previous one.
    pub fn start_session<F, Fut>(&self, run: F)
    where
        F: FnOnce(SessionContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.root.child_token();
        let (faults_tx, faults_rx) = mpsc::channel(4);
        let task = self.runtime.spawn(run(SessionContext {
            cancel: cancel.clone(),
            faults: faults_rx,
        }));

        let previous = lock(&self.session).replace(Session {
            cancel,
            faults: faults_tx,
            task,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Ask the session loop to treat the link as lost.
    pub fn report_fault(&self, reason: DisconnectReason) {
        if let Some(session) = lock(&self.session).as_ref() {
            let _ = session.faults.try_send(reason);
        }
    }

    /// Cancel the session loop and wait up to [`SHUTDOWN_GRACE`] for it to finish.
    ///
    /// Returns `false` if there was no session.
    pub async fn stop_session(&self) -> bool {
        let Some(session) = lock(&self.session).take() else {
            return false;
        };
        session.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, session.task)
            .await
            .is_err()
        {
            warn!(transport = self.kind, "background loop did not stop within grace period");
        }
        true
    }

    /// Stop every background loop without waiting; used when the owning handle drops.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// First call marks the instance disposed and cancels everything derived from it.
    pub fn begin_dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.root.cancel();
        true
    }

    /// Handle an unexpected link loss from inside the session loop.
    ///
    /// Emits `ConnectionLost(reason)`, then runs the reconnection policy.
    /// Returns the reopened resource; the caller installs it and calls
    /// [`LinkCore::mark_open`]. `None` means the loop should exit.
    pub async fn handle_link_loss<T, F, Fut>(
        &self,
        reason: DisconnectReason,
        cancel: &CancellationToken,
        reopen: F,
    ) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return None;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            warn!(transport = self.kind, "reconnection already running");
            return None;
        }
        let _guard = ReconnectGuard(&self.reconnecting);

        warn!(transport = self.kind, %reason, "connection lost");
        self.events.emit(TransportEvent::ConnectionLost(reason));
        if !self.policy.is_active() {
            self.set_state(ConnectionState::Closed);
            return None;
        }

        self.set_state(ConnectionState::Connecting);
        match self
            .policy
            .run(self.kind, &self.events, cancel, reopen)
            .await
        {
            ReconnectOutcome::Reopened { value, attempts } => {
                self.metrics.record_reconnect();
                info!(transport = self.kind, attempts, "link restored");
                Some(value)
            }
            ReconnectOutcome::Exhausted => {
                warn!(
                    transport = self.kind,
                    attempts = self.policy.max_attempts,
                    "reconnect attempts exhausted"
                );
                self.events
                    .emit(TransportEvent::ConnectionLost(DisconnectReason::RetriesExhausted));
                self.set_state(ConnectionState::Closed);
                None
            }
            ReconnectOutcome::Cancelled => None,
        }
    }
}

struct ReconnectGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with(settings: ProtocolSettings) -> LinkCore {
        LinkCore::new("test", &settings).expect("core should build inside a runtime")
    }

    #[test]
    fn construction_outside_runtime_fails() {
        let err = LinkCore::new("test", &ProtocolSettings::default())
            .err()
            .expect("construction should fail without a runtime");
        assert!(matches!(err, TransportError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn identical_state_is_not_reported() {
        let core = core_with(ProtocolSettings::default());
        let mut rx = core.events().subscribe_channel();

        assert!(core.set_state(ConnectionState::Connecting));
        assert!(!core.set_state(ConnectionState::Connecting));
        assert!(core.set_state(ConnectionState::Open));

        let mut states = Vec::new();
        while let Ok(TransportEvent::StateChanged(state)) = rx.try_recv() {
            states.push(state);
        }
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Open]
        );
    }

    #[tokio::test]
    async fn inbox_drops_oldest_when_full() {
        let core = core_with(ProtocolSettings {
            receive_queue_capacity: 2,
            ..ProtocolSettings::default()
        });
        core.set_state(ConnectionState::Open);
        core.deliver(Bytes::from_static(b"1"));
        core.deliver(Bytes::from_static(b"2"));
        core.deliver(Bytes::from_static(b"3"));

        assert_eq!(core.receive().await.unwrap().unwrap().as_ref(), b"2");
        assert_eq!(core.receive().await.unwrap().unwrap().as_ref(), b"3");
    }

    #[tokio::test]
    async fn receive_times_out_with_none() {
        let core = core_with(ProtocolSettings {
            receive_timeout_ms: 30,
            ..ProtocolSettings::default()
        });
        core.set_state(ConnectionState::Open);

        let started = std::time::Instant::now();
        assert!(core.receive().await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn receive_on_closed_returns_none_immediately() {
        let core = core_with(ProtocolSettings::default());
        assert!(core.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disposed_core_rejects_operations() {
        let core = core_with(ProtocolSettings::default());
        assert!(core.begin_dispose());
        assert!(!core.begin_dispose());
        assert!(matches!(
            core.receive().await,
            Err(TransportError::Disposed { .. })
        ));
    }

    #[tokio::test]
    async fn link_loss_without_reconnect_closes() {
        let core = core_with(ProtocolSettings {
            enable_reconnect: false,
            ..ProtocolSettings::default()
        });
        core.set_state(ConnectionState::Open);
        let mut rx = core.events().subscribe_channel();

        let reopened: Option<()> = core
            .handle_link_loss(DisconnectReason::Normal, &CancellationToken::new(), |_| async {
                Ok(())
            })
            .await;

        assert!(reopened.is_none());
        assert_eq!(core.state(), ConnectionState::Closed);
        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::ConnectionLost(DisconnectReason::Normal))
        ));
    }
}
