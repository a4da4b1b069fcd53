use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Point-in-time copy of a transport's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub errors: u64,
    pub reconnects: u64,
    /// Mean of the retained send latency samples, in microseconds.
    pub average_send_latency_us: Option<u64>,
    pub latency_samples: usize,
}

/// Counters plus a bounded window of send latencies.
///
/// When disabled every `record_*` call is a no-op and snapshots stay zeroed.
#[derive(Debug)]
pub struct Metrics {
    enabled: bool,
    capacity: usize,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_failures: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
}

impl Metrics {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_send(&self, bytes: usize, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }
        let mut window = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(elapsed);
    }

    pub fn record_receive(&self, bytes: usize) {
        if self.enabled {
            self.messages_received.fetch_add(1, Ordering::Relaxed);
            self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn record_send_failure(&self) {
        if self.enabled {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        if self.enabled {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self) {
        if self.enabled {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let window = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let average_send_latency_us = if window.is_empty() {
            None
        } else {
            let total: Duration = window.iter().sum();
            Some((total / window.len() as u32).as_micros() as u64)
        };

        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            average_send_latency_us,
            latency_samples: window.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_window_is_bounded() {
        let metrics = Metrics::new(true, 2);
        metrics.record_send(10, Duration::from_micros(100));
        metrics.record_send(10, Duration::from_micros(200));
        metrics.record_send(10, Duration::from_micros(400));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 3);
        assert_eq!(snapshot.bytes_sent, 30);
        assert_eq!(snapshot.latency_samples, 2);
        assert_eq!(snapshot.average_send_latency_us, Some(300));
    }

    #[test]
    fn disabled_metrics_stay_zero() {
        let metrics = Metrics::new(false, 10);
        metrics.record_send(10, Duration::from_millis(1));
        metrics.record_receive(5);
        metrics.record_error();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
