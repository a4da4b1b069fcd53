//! Providers turn a [`ProgramConfig`] into a transport.

use hostlink_transport::{
    ChannelRegistry, InMemoryTransport, SerialTransport, TcpTransport, Transport, UdpTransport,
};
use tracing::debug;

use crate::config::{ProgramConfig, TransportKind};
use crate::error::{FactoryError, Result};

/// Builds one kind of transport from configuration.
pub trait TransportProvider: Send + Sync {
    /// Name matched (case-insensitively) against `ProgramConfig::transport_type`.
    fn transport_type(&self) -> &str;

    /// Construct an unconnected transport. Must be called inside a tokio runtime.
    fn create(&self, config: &ProgramConfig) -> Result<Box<dyn Transport>>;
}

fn expect_kind(config: &ProgramConfig, kind: TransportKind) -> Result<()> {
    if config.validate()? != kind {
        return Err(FactoryError::UnknownTransport {
            name: config.transport_type.clone(),
        });
    }
    debug!(transport = %kind, process = %config.process_name, "creating transport");
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProvider;

impl TransportProvider for TcpProvider {
    fn transport_type(&self) -> &str {
        TransportKind::Tcp.as_str()
    }

    fn create(&self, config: &ProgramConfig) -> Result<Box<dyn Transport>> {
        expect_kind(config, TransportKind::Tcp)?;
        let transport = TcpTransport::new(config.host.clone(), config.port, config.tcp.clone())?;
        Ok(Box::new(transport))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UdpProvider;

impl TransportProvider for UdpProvider {
    fn transport_type(&self) -> &str {
        TransportKind::Udp.as_str()
    }

    fn create(&self, config: &ProgramConfig) -> Result<Box<dyn Transport>> {
        expect_kind(config, TransportKind::Udp)?;
        let transport = UdpTransport::new(config.host.clone(), config.port, config.udp.clone())?;
        Ok(Box::new(transport))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialProvider;

impl TransportProvider for SerialProvider {
    fn transport_type(&self) -> &str {
        TransportKind::Serial.as_str()
    }

    fn create(&self, config: &ProgramConfig) -> Result<Box<dyn Transport>> {
        expect_kind(config, TransportKind::Serial)?;
        let transport = SerialTransport::new(config.port_name.clone(), config.serial.clone())?;
        Ok(Box::new(transport))
    }
}

/// Builds in-process transports that share one registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    registry: ChannelRegistry,
}

impl InMemoryProvider {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }
}

impl TransportProvider for InMemoryProvider {
    fn transport_type(&self) -> &str {
        TransportKind::InMemory.as_str()
    }

    fn create(&self, config: &ProgramConfig) -> Result<Box<dyn Transport>> {
        expect_kind(config, TransportKind::InMemory)?;
        let transport = InMemoryTransport::new(
            config.channel_id.clone(),
            config.in_memory.clone(),
            self.registry.clone(),
        )?;
        Ok(Box::new(transport))
    }
}
