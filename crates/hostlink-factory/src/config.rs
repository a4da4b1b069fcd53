//! Program configuration loaded from JSON.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use hostlink_transport::{InMemorySettings, SerialSettings, TcpSettings, UdpSettings};
use serde::{Deserialize, Serialize};

use crate::error::{FactoryError, Result};

/// Lowercase a transport type name and drop separators, so
/// `"InMemory"`, `"in_memory"` and `"in-memory"` compare equal.
pub fn normalize_type(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// The transports this workspace ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
    Serial,
    InMemory,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [Self::Tcp, Self::Udp, Self::Serial, Self::InMemory];

    /// Canonical name used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Serial => "Serial",
            Self::InMemory => "InMemory",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = normalize_type(s);
        if normalized.is_empty() {
            return Err(FactoryError::MissingType);
        }
        Self::ALL
            .into_iter()
            .find(|kind| normalize_type(kind.as_str()) == normalized)
            .ok_or_else(|| FactoryError::UnknownTransport {
                name: s.to_string(),
            })
    }
}

/// Everything needed to reach one external program.
///
/// Process fields are carried for the process manager and not interpreted
/// here. Only the target fields of the declared `transport_type` matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    pub process_name: String,
    pub program_path: String,
    pub arguments: String,
    /// `"TCP"`, `"UDP"`, `"Serial"`, `"InMemory"` or a custom provider name. Case-insensitive.
    #[serde(alias = "protocol_type")]
    pub transport_type: String,
    /// Remote host for TCP and UDP. Default: 127.0.0.1.
    pub host: String,
    /// Remote port for TCP and UDP.
    pub port: u16,
    /// Channel name for the in-process transport.
    pub channel_id: String,
    /// Device name for the serial transport.
    pub port_name: String,
    /// Default: 5000.
    pub process_timeout_ms: u64,
    /// Default: 3.
    pub max_retry_attempts: u32,
    /// Default: 1000.
    pub retry_delay_ms: u64,
    pub tcp: TcpSettings,
    pub udp: UdpSettings,
    pub serial: SerialSettings,
    pub in_memory: InMemorySettings,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            process_name: String::new(),
            program_path: String::new(),
            arguments: String::new(),
            transport_type: String::new(),
            host: "127.0.0.1".to_string(),
            port: 0,
            channel_id: String::new(),
            port_name: String::new(),
            process_timeout_ms: 5000,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            tcp: TcpSettings::default(),
            udp: UdpSettings::default(),
            serial: SerialSettings::default(),
            in_memory: InMemorySettings::default(),
        }
    }
}

impl ProgramConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| FactoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The built-in transport this configuration declares.
    pub fn kind(&self) -> Result<TransportKind> {
        self.transport_type.parse()
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Check the declared transport's target fields and settings.
    pub fn validate(&self) -> Result<TransportKind> {
        let kind = self.kind()?;
        let transport = kind.as_str();
        let require = |present: bool, field: &'static str| {
            if present {
                Ok(())
            } else {
                Err(FactoryError::MissingField { transport, field })
            }
        };
        let settings = |source| FactoryError::Settings { transport, source };

        match kind {
            TransportKind::Tcp => {
                require(!self.host.trim().is_empty(), "host")?;
                require(self.port != 0, "port")?;
                self.tcp.validate().map_err(settings)?;
            }
            TransportKind::Udp => {
                require(!self.host.trim().is_empty(), "host")?;
                require(self.port != 0, "port")?;
                self.udp.validate().map_err(settings)?;
            }
            TransportKind::Serial => {
                require(!self.port_name.trim().is_empty(), "port_name")?;
                self.serial.validate().map_err(settings)?;
            }
            TransportKind::InMemory => {
                require(!self.channel_id.trim().is_empty(), "channel_id")?;
                self.in_memory.validate().map_err(settings)?;
            }
        }
        Ok(kind)
    }
}
