use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::event::{EventHub, TransportEvent};
use crate::settings::ProtocolSettings;

/// Bounded retry schedule for reopening a lost link.
///
/// Attempt `n` waits `base_delay * n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// How a reconnection run ended.
#[derive(Debug)]
pub enum ReconnectOutcome<T> {
    /// The resource reopened on attempt `attempts`.
    Reopened { value: T, attempts: u32 },
    /// Every attempt failed.
    Exhausted,
    /// The owning session was cancelled mid-run.
    Cancelled,
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &ProtocolSettings) -> Self {
        Self {
            enabled: settings.enable_reconnect,
            max_attempts: settings.max_reconnect_attempts,
            base_delay: settings.reconnect_delay(),
            max_delay: settings.max_reconnect_delay(),
        }
    }

    /// Whether a loss should be retried at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.max_attempts > 0
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }

    /// Run attempts until `reopen` succeeds, attempts run out, or `cancel` fires.
    ///
    /// Each attempt emits `ReconnectAttempt(n)` then `ReconnectWait(delay)`,
    /// sleeps, then calls `reopen(n)`. Failed attempts are reported as
    /// error events.
    pub async fn run<T, F, Fut>(
        &self,
        transport: &'static str,
        events: &EventHub,
        cancel: &CancellationToken,
        mut reopen: F,
    ) -> ReconnectOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return ReconnectOutcome::Cancelled;
            }

            let delay = self.delay_for(attempt);
            events.emit(TransportEvent::ReconnectAttempt(attempt));
            events.emit(TransportEvent::ReconnectWait(delay));
            info!(
                transport,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
                result = reopen(attempt) => result,
            };

            match result {
                Ok(value) => {
                    info!(transport, attempt, "reconnected");
                    return ReconnectOutcome::Reopened {
                        value,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    warn!(transport, attempt, error = %err, "reconnect attempt failed");
                    events.emit(TransportEvent::Error(Arc::new(err)));
                }
            }
        }

        ReconnectOutcome::Exhausted
    }
}
