use std::path::PathBuf;

use hostlink_transport::{SettingsError, TransportError};

/// Errors that can occur while loading configuration or building transports.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// The configuration is not valid JSON for [`ProgramConfig`](crate::ProgramConfig).
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Settings for the declared transport failed validation.
    #[error("invalid {transport} settings: {source}")]
    Settings {
        transport: &'static str,
        source: SettingsError,
    },

    /// A field the declared transport needs is empty.
    #[error("{transport} transport requires `{field}`")]
    MissingField {
        transport: &'static str,
        field: &'static str,
    },

    /// The configuration declares no transport type.
    #[error("configuration declares no transport type")]
    MissingType,

    /// No provider is registered for the declared transport type.
    #[error("no provider registered for transport type {name:?}")]
    UnknownTransport { name: String },

    /// The transport rejected its construction arguments.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FactoryError>;
