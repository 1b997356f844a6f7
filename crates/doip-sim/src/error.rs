//! Simulator errors

use std::net::SocketAddr;
use std::path::PathBuf;

use sim_ecu::MatcherError;
use thiserror::Error;

/// Invalid simulator setup. Raised before anything is bound.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid hex in {field}: {reason}")]
    InvalidHex { field: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate logical address 0x{address:04X} in entity '{entity}'")]
    DuplicateAddress { entity: String, address: u16 },

    #[error("Functional address 0x{address:04X} of ECU '{ecu}' is also a logical address in entity '{entity}'")]
    AddressConflict {
        entity: String,
        ecu: String,
        address: u16,
    },

    #[error("Duplicate entity name '{0}'")]
    DuplicateEntity(String),

    #[error("Response '{name}': {reason}")]
    InvalidResponse { name: String, reason: String },

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error("Entity '{0}' enables TLS but no secure acceptor was provided")]
    MissingSecureAcceptor(String),
}

impl ConfigError {
    pub(crate) fn value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Socket setup failures
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to bind {kind} socket on {addr}: {source}")]
    Bind {
        kind: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
