use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hostlink_transport::{ChannelRegistry, Transport};
use tracing::debug;

use crate::config::{normalize_type, ProgramConfig};
use crate::error::{FactoryError, Result};
use crate::provider::{InMemoryProvider, SerialProvider, TcpProvider, TransportProvider, UdpProvider};

/// Maps declared transport types to providers.
#[derive(Default)]
pub struct TransportFactory {
    providers: HashMap<String, Arc<dyn TransportProvider>>,
}

impl TransportFactory {
    /// A factory with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with the TCP, UDP, Serial and InMemory providers registered.
    pub fn with_defaults(registry: ChannelRegistry) -> Self {
        let mut factory = Self::new();
        factory.register(Arc::new(TcpProvider));
        factory.register(Arc::new(UdpProvider));
        factory.register(Arc::new(SerialProvider));
        factory.register(Arc::new(InMemoryProvider::new(registry)));
        factory
    }

    /// Register `provider`, replacing and returning any provider with the same type.
    pub fn register(
        &mut self,
        provider: Arc<dyn TransportProvider>,
    ) -> Option<Arc<dyn TransportProvider>> {
        let key = normalize_type(provider.transport_type());
        debug!(transport_type = provider.transport_type(), "provider registered");
        self.providers.insert(key, provider)
    }

    pub fn supports(&self, transport_type: &str) -> bool {
        self.providers.contains_key(&normalize_type(transport_type))
    }

    /// Registered type names, sorted.
    pub fn transport_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .values()
            .map(|provider| provider.transport_type().to_string())
            .collect();
        names.sort();
        names
    }

    /// Build the transport `config` declares.
    pub fn create(&self, config: &ProgramConfig) -> Result<Box<dyn Transport>> {
        let key = normalize_type(&config.transport_type);
        if key.is_empty() {
            return Err(FactoryError::MissingType);
        }
        let provider = self
            .providers
            .get(&key)
            .ok_or_else(|| FactoryError::UnknownTransport {
                name: config.transport_type.clone(),
            })?;
        provider.create(config)
    }
}

impl fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFactory")
            .field("transport_types", &self.transport_types())
            .finish()
    }
}
