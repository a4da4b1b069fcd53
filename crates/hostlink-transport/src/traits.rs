use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;

use crate::error::Result;
use crate::event::EventHub;
use crate::metrics::MetricsSnapshot;
use crate::state::ConnectionState;

/// The contract every hostlink transport implements.
///
/// `send` and `receive` report local failures as `false`/`None` and raise
/// the detail as an error event. Only use after dispose and unusable
/// arguments come back as `Err`.
///
/// The `*_blocking` forms drive the async operation on the runtime the
/// transport was created on. They need a multi-thread runtime and must not
/// be called from inside async code.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name used in logs ("tcp", "udp", ...).
    fn kind(&self) -> &'static str;

    fn state(&self) -> ConnectionState;

    /// True while the link is open. Has no side effects.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn events(&self) -> &EventHub;

    fn metrics(&self) -> MetricsSnapshot;

    /// Runtime the transport's background loop runs on.
    fn runtime(&self) -> &Handle;

    /// Open the link. Returns `Ok(true)` immediately when already open.
    async fn connect(&self) -> Result<bool>;

    /// Close the link. Idempotent; never triggers reconnection.
    async fn disconnect(&self) -> Result<()>;

    /// Send one message. `Ok(false)` when closed or on a transmission fault.
    async fn send(&self, data: &[u8]) -> Result<bool>;

    /// Next received message, or `None` when closed or after the receive timeout.
    async fn receive(&self) -> Result<Option<Bytes>>;

    /// Release every resource. Idempotent; cleanup faults go to the error event.
    async fn dispose(&self);

    fn connect_blocking(&self) -> Result<bool> {
        self.runtime().block_on(self.connect())
    }

    fn disconnect_blocking(&self) -> Result<()> {
        self.runtime().block_on(self.disconnect())
    }

    fn send_blocking(&self, data: &[u8]) -> Result<bool> {
        self.runtime().block_on(self.send(data))
    }

    fn receive_blocking(&self) -> Result<Option<Bytes>> {
        self.runtime().block_on(self.receive())
    }

    fn dispose_blocking(&self) {
        self.runtime().block_on(self.dispose())
    }
}
