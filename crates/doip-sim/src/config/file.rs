//! TOML configuration file
//!
//! ```toml
//! [[entities]]
//! name = "gateway"
//! logical_address = 0x1010
//! vin = "WBA00000000000001"
//! eid = "101010101010"
//! gid = "909090909090"
//!
//! [[entities.ecus]]
//! name = "engine"
//! physical_address = 0x1010
//! functional_address = 0xDFFF
//!
//! [[entities.ecus.responses]]
//! request = "10 01"
//! ack = true
//! ```

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use doip_wire::codes::DEFAULT_PROTOCOL_VERSION;
use doip_wire::{DOIP_PORT, DOIP_TLS_PORT};
use serde::{Deserialize, Serialize};
use sim_ecu::config::{DEFAULT_REGEX_MATCH_BYTES, DEFAULT_PENDING_INTERVAL};
use sim_ecu::nrc::nrc;
use sim_ecu::{EcuConfig, RequestPattern};
use tracing::Level;

use super::entity::{
    fixed_bytes, AdditionalVam, EcuDefinition, EntityConfig, NodeType, TlsMode,
    DEFAULT_ANNOUNCE_COUNT, DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
use super::response::{ResponseAction, StaticResponse};
use crate::error::ConfigError;

/// Root of a configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub entities: Vec<EntitySection>,
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate every section and build runtime entity descriptions
    pub fn entity_configs(&self) -> Result<Vec<EntityConfig>, ConfigError> {
        self.entities.iter().map(EntitySection::to_config).collect()
    }
}

// =============================================================================
// Entity
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySection {
    pub name: String,
    pub logical_address: u16,
    /// 17 ASCII characters
    pub vin: String,
    /// 6 bytes as hex
    pub eid: String,
    /// 6 bytes as hex
    pub gid: String,

    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u32,

    #[serde(default)]
    pub node_type: NodeType,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    #[serde(default = "default_local_address")]
    pub local_address: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub tls_mode: TlsMode,

    #[serde(default = "default_tls_port")]
    pub tls_port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: u8,

    #[serde(default = "default_announce_count")]
    pub announce_count: u32,

    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,

    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: IpAddr,

    /// Defaults to `port`
    #[serde(default)]
    pub broadcast_port: Option<u16>,

    #[serde(default)]
    pub ecus: Vec<EcuSection>,
}

fn default_max_payload_size() -> u32 {
    DEFAULT_MAX_PAYLOAD_SIZE
}

fn default_protocol_version() -> u8 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_local_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DOIP_PORT
}

fn default_tls_port() -> u16 {
    DOIP_TLS_PORT
}

fn default_max_connections() -> u8 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_announce_count() -> u32 {
    DEFAULT_ANNOUNCE_COUNT
}

fn default_announce_interval_ms() -> u64 {
    DEFAULT_ANNOUNCE_INTERVAL.as_millis() as u64
}

fn default_broadcast_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}

impl EntitySection {
    pub fn to_config(&self) -> Result<EntityConfig, ConfigError> {
        let mut config = EntityConfig::new(
            self.name.clone(),
            self.logical_address,
            self.vin.as_bytes(),
            parse_hex(&format!("{}.eid", self.name), &self.eid)?,
            parse_hex(&format!("{}.gid", self.name), &self.gid)?,
        )?;

        config.max_payload_size = self.max_payload_size;
        config.node_type = self.node_type;
        config.protocol_version = self.protocol_version;
        config.local_address = self.local_address;
        config.port = self.port;
        config.tls_mode = self.tls_mode;
        config.tls_port = self.tls_port;
        config.max_connections = self.max_connections;
        config.announce_count = self.announce_count;
        config.announce_interval = Duration::from_millis(self.announce_interval_ms);
        config.announce_address = SocketAddr::new(
            self.broadcast_address,
            self.broadcast_port.unwrap_or(self.port),
        );

        for ecu in &self.ecus {
            config.ecus.push(ecu.to_definition(&self.name)?);
        }
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// ECU
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuSection {
    pub name: String,
    pub physical_address: u16,

    #[serde(default)]
    pub functional_address: Option<u16>,

    #[serde(default = "default_pending_interval_ms")]
    pub pending_interval_ms: u64,

    #[serde(default = "default_regex_match_bytes")]
    pub regex_match_bytes: usize,

    #[serde(default = "default_true")]
    pub nrc_on_no_match: bool,

    /// SID (hex string, e.g. "0x22") -> echoed byte count for `ack`
    #[serde(default)]
    pub ack_lengths: BTreeMap<String, usize>,

    #[serde(default = "default_busy_nrc")]
    pub busy_nrc: u8,

    #[serde(default = "default_true")]
    pub use_prefix_index: bool,

    #[serde(default)]
    pub additional_vam: Option<AdditionalVamSection>,

    #[serde(default)]
    pub responses: Vec<ResponseSection>,
}

fn default_pending_interval_ms() -> u64 {
    DEFAULT_PENDING_INTERVAL.as_millis() as u64
}

fn default_regex_match_bytes() -> usize {
    DEFAULT_REGEX_MATCH_BYTES
}

fn default_true() -> bool {
    true
}

fn default_busy_nrc() -> u8 {
    nrc::BUSY_REPEAT_REQUEST
}

impl EcuSection {
    fn to_definition(&self, entity: &str) -> Result<EcuDefinition, ConfigError> {
        let field = |name: &str| format!("{}.{}.{}", entity, self.name, name);

        if self.pending_interval_ms == 0 {
            return Err(ConfigError::value(field("pending_interval_ms"), "must be positive"));
        }

        let mut config = EcuConfig::new(self.name.clone(), self.physical_address);
        config.functional_address = self.functional_address;
        config.pending_interval = Duration::from_millis(self.pending_interval_ms);
        config.regex_match_bytes = self.regex_match_bytes;
        config.nrc_on_no_match = self.nrc_on_no_match;
        config.busy_nrc = self.busy_nrc;
        config.use_prefix_index = self.use_prefix_index;
        for (sid, length) in &self.ack_lengths {
            let sid = parse_u8(&field("ack_lengths"), sid)?;
            config.ack_lengths.insert(sid, *length);
        }

        let additional_vam = self
            .additional_vam
            .as_ref()
            .map(|vam| vam.to_vam(&field("additional_vam"), self.physical_address))
            .transpose()?;

        let responses = self
            .responses
            .iter()
            .enumerate()
            .map(|(i, response)| response.to_static(&format!("{}#{}", self.name, i)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EcuDefinition {
            config,
            additional_vam,
            responses,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalVamSection {
    /// Defaults to the ECU's physical address
    #[serde(default)]
    pub logical_address: Option<u16>,
    pub vin: String,
    pub eid: String,
    pub gid: String,
}

impl AdditionalVamSection {
    fn to_vam(&self, field: &str, default_address: u16) -> Result<AdditionalVam, ConfigError> {
        Ok(AdditionalVam {
            logical_address: self.logical_address.unwrap_or(default_address),
            vin: fixed_bytes(&format!("{}.vin", field), self.vin.as_bytes())?,
            eid: fixed_bytes(
                &format!("{}.eid", field),
                &parse_hex(&format!("{}.eid", field), &self.eid)?,
            )?,
            gid: fixed_bytes(
                &format!("{}.gid", field),
                &parse_hex(&format!("{}.gid", field), &self.gid)?,
            )?,
        })
    }
}

// =============================================================================
// Canned responses
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseSection {
    /// Defaults to "<ecu>#<index>"
    #[serde(default)]
    pub name: Option<String>,

    /// Exact request bytes as hex, whitespace allowed
    #[serde(default)]
    pub request: Option<String>,

    /// Regex over the uppercase hex of the request
    #[serde(default)]
    pub regex: Option<String>,

    /// Response bytes as hex
    #[serde(default)]
    pub response: Option<String>,

    #[serde(default)]
    pub ack: bool,

    #[serde(default)]
    pub nrc: Option<u8>,

    #[serde(default)]
    pub pending_ms: Option<u64>,

    #[serde(default)]
    pub continue_matching: bool,

    /// trace, debug, info, warn or error
    #[serde(default)]
    pub log_level: Option<String>,
}

impl ResponseSection {
    fn to_static(&self, default_name: &str) -> Result<StaticResponse, ConfigError> {
        let name = self.name.clone().unwrap_or_else(|| default_name.to_string());
        let invalid = |reason: &str| ConfigError::InvalidResponse {
            name: name.clone(),
            reason: reason.to_string(),
        };

        let pattern = match (&self.request, &self.regex) {
            (Some(request), None) => RequestPattern::Exact(parse_hex(&name, request)?),
            (None, Some(regex)) => {
                RequestPattern::regex(regex).map_err(|e| invalid(&e.to_string()))?
            }
            (Some(_), Some(_)) => return Err(invalid("set either 'request' or 'regex', not both")),
            (None, None) => return Err(invalid("one of 'request' or 'regex' is required")),
        };

        let action = match (&self.response, self.ack, self.nrc) {
            (Some(response), false, None) => ResponseAction::Respond(parse_hex(&name, response)?),
            (None, true, None) => ResponseAction::Ack,
            (None, false, Some(code)) => ResponseAction::Nrc(code),
            (None, false, None) => {
                return Err(invalid("one of 'response', 'ack' or 'nrc' is required"))
            }
            _ => return Err(invalid("'response', 'ack' and 'nrc' are mutually exclusive")),
        };

        let log_level = match &self.log_level {
            Some(level) => Level::from_str(level).map_err(|_| invalid("unknown log level"))?,
            None => Level::DEBUG,
        };

        let mut response = StaticResponse::new(name, pattern, action);
        response.pending = self.pending_ms.map(Duration::from_millis);
        response.continue_matching = self.continue_matching;
        response.log_level = log_level;
        Ok(response)
    }
}

/// Hex bytes with optional `0x` prefix and any whitespace
pub(crate) fn parse_hex(field: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    let compact: String = value.split_whitespace().collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(compact).map_err(|e| ConfigError::InvalidHex {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn parse_u8(field: &str, value: &str) -> Result<u8, ConfigError> {
    match parse_hex(field, value)?.as_slice() {
        [byte] => Ok(*byte),
        other => Err(ConfigError::InvalidLength {
            field: field.to_string(),
            expected: 1,
            actual: other.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[[entities]]
name = "gateway"
logical_address = 0x1010
vin = "WBA00000000000001"
eid = "10 10 10 10 10 10"
gid = "909090909090"
max_connections = 4
tls_mode = "optional"

[[entities.ecus]]
name = "gateway"
physical_address = 0x1010
functional_address = 0xDFFF
ack_lengths = { "0x22" = 3 }

[[entities.ecus.responses]]
request = "10 01"
ack = true

[[entities.ecus.responses]]
name = "vin"
regex = "22F190"
response = "62 F1 90 57 42 41"
pending_ms = 100

[[entities.ecus]]
name = "engine"
physical_address = 0x1011
functional_address = 0xDFFF

[entities.ecus.additional_vam]
vin = "WBA00000000000002"
eid = "111111111111"
gid = "909090909090"
"#;

    #[test]
    fn test_sample_config() {
        let configs = SimConfig::from_toml(SAMPLE).unwrap().entity_configs().unwrap();
        assert_eq!(configs.len(), 1);

        let gateway = &configs[0];
        assert_eq!(gateway.logical_address, 0x1010);
        assert_eq!(gateway.eid, [0x10; 6]);
        assert_eq!(gateway.max_connections, 4);
        assert_eq!(gateway.tls_mode, TlsMode::Optional);
        assert_eq!(gateway.port, 13400);
        assert_eq!(
            gateway.announce_address,
            "255.255.255.255:13400".parse::<SocketAddr>().unwrap()
        );

        let ecu = &gateway.ecus[0];
        assert_eq!(ecu.config.functional_address, Some(0xDFFF));
        assert_eq!(ecu.config.ack_length(0x22), 3);
        assert_eq!(ecu.responses.len(), 2);
        assert_eq!(ecu.responses[0].name, "gateway#0");
        assert_eq!(ecu.responses[0].action, ResponseAction::Ack);
        assert_eq!(ecu.responses[1].pending, Some(Duration::from_millis(100)));

        let engine = &gateway.ecus[1];
        let vam = engine.additional_vam.as_ref().unwrap();
        assert_eq!(vam.logical_address, 0x1011);
        assert_eq!(&vam.vin, b"WBA00000000000002");
    }

    #[test]
    fn test_request_and_regex_conflict() {
        let section = ResponseSection {
            request: Some("10 01".into()),
            regex: Some("1001".into()),
            ack: true,
            ..Default::default()
        };
        assert!(matches!(
            section.to_static("x"),
            Err(ConfigError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_action_required_and_exclusive() {
        let missing = ResponseSection {
            request: Some("10 01".into()),
            ..Default::default()
        };
        assert!(missing.to_static("x").is_err());

        let both = ResponseSection {
            request: Some("10 01".into()),
            ack: true,
            nrc: Some(0x22),
            ..Default::default()
        };
        assert!(both.to_static("x").is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let section = ResponseSection {
            regex: Some("22(".into()),
            ack: true,
            ..Default::default()
        };
        assert!(section.to_static("x").is_err());
    }

    #[test]
    fn test_bad_eid_is_fatal() {
        let config = SAMPLE.replace("10 10 10 10 10 10", "1010");
        let err = SimConfig::from_toml(&config)
            .unwrap()
            .entity_configs()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLength { expected: 6, actual: 2, .. }));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("f", "0x10 01").unwrap(), vec![0x10, 0x01]);
        assert_eq!(parse_hex("f", "").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("f", "1G").is_err());
        assert_eq!(parse_u8("f", "0x22").unwrap(), 0x22);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = SimConfig::load(&path).unwrap();
        assert_eq!(config.entities[0].ecus.len(), 2);

        let err = SimConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
