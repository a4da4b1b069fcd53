//! Interchangeable message transports.
//!
//! Every transport implements [`Transport`]: connect, send and receive whole
//! messages, observe lifecycle through an [`EventHub`], dispose. Four are
//! provided:
//! - [`TcpTransport`]: length-prefixed stream framing
//! - [`UdpTransport`]: raw datagrams, or chunked and acknowledged in reliable mode
//! - [`SerialTransport`]: polled serial port, one message per read
//! - [`InMemoryTransport`]: named in-process channels from a [`ChannelRegistry`]
//!
//! All of them reopen a lost link according to [`ReconnectPolicy`] when
//! `enable_reconnect` is set. Transports must be constructed inside a tokio
//! runtime; their background loops run on it.

pub mod error;
pub mod event;
pub mod memory;
pub mod metrics;
pub mod reconnect;
pub mod registry;
pub mod serial;
pub mod settings;
pub mod state;
pub mod tcp;
pub mod traits;
pub mod udp;

mod link;
mod reliable;

pub use error::{Result, SettingsError, TransportError};
pub use event::{EventHub, SubscriptionId, TransportEvent};
pub use memory::InMemoryTransport;
pub use metrics::{Metrics, MetricsSnapshot};
pub use reconnect::{ReconnectOutcome, ReconnectPolicy};
pub use registry::{Channel, ChannelRegistry};
#[cfg(feature = "serial")]
pub use serial::{available_ports, SystemPortOpener};
pub use serial::{PortInfo, PortOpener, SerialStream, SerialTransport};
pub use settings::{
    Handshake, InMemorySettings, Parity, ProtocolSettings, SerialSettings, StopBits, TcpSettings,
    UdpSettings,
};
pub use state::{ConnectionState, DisconnectReason};
pub use tcp::TcpTransport;
pub use traits::Transport;
pub use udp::UdpTransport;
