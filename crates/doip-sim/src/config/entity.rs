//! Validated entity and ECU descriptions

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use doip_wire::codes::{node_type, DEFAULT_PROTOCOL_VERSION};
use doip_wire::{DOIP_PORT, DOIP_TLS_PORT, EID_LEN, GID_LEN, VIN_LEN};
use serde::{Deserialize, Serialize};
use sim_ecu::EcuConfig;

use super::response::StaticResponse;
use crate::error::ConfigError;

/// Default maximum diagnostic payload, reported in entity status
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 0xFFFF;
/// Default number of concurrently registered testers
pub const DEFAULT_MAX_CONNECTIONS: u8 = 8;
/// Vehicle announcements sent after each start
pub const DEFAULT_ANNOUNCE_COUNT: u32 = 3;
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_millis(500);

/// Role reported in entity status responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Gateway,
    Node,
}

impl NodeType {
    pub fn code(self) -> u8 {
        match self {
            Self::Gateway => node_type::GATEWAY,
            Self::Node => node_type::NODE,
        }
    }
}

/// Whether the entity accepts TLS connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    Disabled,
    /// Plain and TLS connections are both accepted
    Optional,
    /// Plain connections cannot activate routing
    Mandatory,
}

impl TlsMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Extra identity announced by a gateway on behalf of one of its ECUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalVam {
    pub logical_address: u16,
    pub vin: [u8; VIN_LEN],
    pub eid: [u8; EID_LEN],
    pub gid: [u8; GID_LEN],
}

/// One ECU hosted by an entity
#[derive(Debug, Clone)]
pub struct EcuDefinition {
    pub config: EcuConfig,
    pub additional_vam: Option<AdditionalVam>,
    /// Canned responses installed after the factory built the ECU
    pub responses: Vec<StaticResponse>,
}

impl From<EcuConfig> for EcuDefinition {
    fn from(config: EcuConfig) -> Self {
        Self {
            config,
            additional_vam: None,
            responses: Vec::new(),
        }
    }
}

/// A DoIP entity (gateway or node) and the ECUs behind it
#[derive(Debug, Clone)]
pub struct EntityConfig {
    pub name: String,
    pub logical_address: u16,
    pub vin: [u8; VIN_LEN],
    pub eid: [u8; EID_LEN],
    pub gid: [u8; GID_LEN],
    pub max_payload_size: u32,
    pub node_type: NodeType,
    pub protocol_version: u8,
    pub local_address: IpAddr,
    /// UDP and plain TCP port
    pub port: u16,
    pub tls_mode: TlsMode,
    pub tls_port: u16,
    pub max_connections: u8,
    pub announce_count: u32,
    pub announce_interval: Duration,
    /// Destination of vehicle announcements
    pub announce_address: SocketAddr,
    pub ecus: Vec<EcuDefinition>,
}

impl EntityConfig {
    /// Identifier lengths are checked here; a wrong length is fatal.
    pub fn new(
        name: impl Into<String>,
        logical_address: u16,
        vin: impl AsRef<[u8]>,
        eid: impl AsRef<[u8]>,
        gid: impl AsRef<[u8]>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.into(),
            logical_address,
            vin: fixed_bytes("vin", vin.as_ref())?,
            eid: fixed_bytes("eid", eid.as_ref())?,
            gid: fixed_bytes("gid", gid.as_ref())?,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            node_type: NodeType::default(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            local_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DOIP_PORT,
            tls_mode: TlsMode::default(),
            tls_port: DOIP_TLS_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            announce_count: DEFAULT_ANNOUNCE_COUNT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            announce_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DOIP_PORT),
            ecus: Vec::new(),
        })
    }

    pub fn with_ecu(mut self, ecu: impl Into<EcuDefinition>) -> Self {
        self.ecus.push(ecu.into());
        self
    }

    /// Bind everything to `address` with OS-assigned ports
    pub fn on_ephemeral_ports(mut self, address: IpAddr) -> Self {
        self.local_address = address;
        self.port = 0;
        self.tls_port = 0;
        self
    }

    pub fn vin_string(&self) -> String {
        String::from_utf8_lossy(&self.vin).to_string()
    }

    /// Address rules: physical addresses are unique, and no functional
    /// address may shadow a physical one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut physical = HashSet::new();
        for ecu in &self.ecus {
            if !physical.insert(ecu.config.physical_address) {
                return Err(ConfigError::DuplicateAddress {
                    entity: self.name.clone(),
                    address: ecu.config.physical_address,
                });
            }
        }

        for ecu in &self.ecus {
            if let Some(functional) = ecu.config.functional_address {
                if physical.contains(&functional) {
                    return Err(ConfigError::AddressConflict {
                        entity: self.name.clone(),
                        ecu: ecu.config.name.clone(),
                        address: functional,
                    });
                }
            }
            if let Some(vam) = &ecu.additional_vam {
                if !physical.contains(&vam.logical_address) {
                    return Err(ConfigError::value(
                        format!("{}.additional_vam.logical_address", ecu.config.name),
                        format!("0x{:04X} is not an ECU address of this entity", vam.logical_address),
                    ));
                }
            }
            if ecu.config.regex_match_bytes == 0 {
                return Err(ConfigError::value(
                    format!("{}.regex_match_bytes", ecu.config.name),
                    "must be at least 1",
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(ConfigError::value(
                format!("{}.max_connections", self.name),
                "must be at least 1",
            ));
        }
        if self.protocol_version == 0x00 || self.protocol_version == 0xFF {
            return Err(ConfigError::value(
                format!("{}.protocol_version", self.name),
                "0x00 and 0xFF are reserved",
            ));
        }
        Ok(())
    }
}

/// Copy `bytes` into a fixed-size identifier or fail with its real length
pub(crate) fn fixed_bytes<const N: usize>(field: &str, bytes: &[u8]) -> Result<[u8; N], ConfigError> {
    bytes.try_into().map_err(|_| ConfigError::InvalidLength {
        field: field.to_string(),
        expected: N,
        actual: bytes.len(),
    })
}
