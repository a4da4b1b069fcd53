use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::TransportError;
use crate::state::{ConnectionState, DisconnectReason};

/// Notifications raised by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete inbound message.
    DataReceived(Bytes),
    /// A background or local fault that was not returned to a caller.
    Error(Arc<TransportError>),
    Connected,
    Disconnected,
    ConnectionLost(DisconnectReason),
    StateChanged(ConnectionState),
    /// Reconnect attempt number, starting at 1.
    ReconnectAttempt(u32),
    /// Delay before the attempt just announced.
    ReconnectWait(Duration),
}

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

#[derive(Clone)]
enum Observer {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<TransportEvent>),
}

/// Observer list for one transport instance.
///
/// Observers run on the emitting task, outside the list lock. A panicking
/// callback is logged and skipped; the remaining observers still run.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every subsequent event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.insert(Observer::Callback(Arc::new(callback)))
    }

    /// Receive every subsequent event on an unbounded channel.
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(Observer::Channel(tx));
        rx
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    pub fn emit(&self, event: TransportEvent) {
        let snapshot: Vec<(SubscriptionId, Observer)> = self.lock().clone();
        let mut closed = Vec::new();

        for (id, observer) in snapshot {
            match observer {
                Observer::Callback(callback) => {
                    if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                        warn!(subscription = id.0, event = ?event, "event observer panicked");
                    }
                }
                Observer::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.lock().retain(|(id, _)| !closed.contains(id));
        }
    }

    fn insert(&self, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, observer));
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Observer)>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn callbacks_see_events_in_emit_order() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.subscribe(move |event| {
            if let TransportEvent::StateChanged(state) = event {
                sink.lock().unwrap().push(*state);
            }
        });

        hub.emit(TransportEvent::StateChanged(ConnectionState::Connecting));
        hub.emit(TransportEvent::StateChanged(ConnectionState::Open));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Open]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.emit(TransportEvent::Connected);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.emit(TransportEvent::Connected);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_observer_does_not_block_others() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        hub.subscribe(|_| panic!("observer failure"));
        let counter = Arc::clone(&count);
        hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.emit(TransportEvent::Disconnected);
        hub.emit(TransportEvent::Disconnected);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(hub.observer_count(), 2);
    }

    #[test]
    fn dropped_channel_receivers_are_pruned() {
        let hub = EventHub::new();
        let mut live = hub.subscribe_channel();
        let dropped = hub.subscribe_channel();
        drop(dropped);

        hub.emit(TransportEvent::ReconnectAttempt(1));

        assert!(matches!(
            live.try_recv(),
            Ok(TransportEvent::ReconnectAttempt(1))
        ));
        assert_eq!(hub.observer_count(), 1);
    }
}
