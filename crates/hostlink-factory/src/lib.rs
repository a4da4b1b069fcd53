//! Configuration-driven transport construction.
//!
//! A [`ProgramConfig`] names a transport type and its targets. The
//! [`TransportFactory`] looks up the provider registered for that type
//! (case-insensitively) and hands back an unconnected `Box<dyn Transport>`.

pub mod config;
pub mod error;
pub mod factory;
pub mod provider;

pub use config::{normalize_type, ProgramConfig, TransportKind};
pub use error::{FactoryError, Result};
pub use factory::TransportFactory;
pub use provider::{InMemoryProvider, SerialProvider, TcpProvider, TransportProvider, UdpProvider};
