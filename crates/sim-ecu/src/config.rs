//! Per-ECU runtime settings

use std::collections::HashMap;
use std::time::Duration;

use crate::nrc::nrc;

/// Default gap between response-pending frames
pub const DEFAULT_PENDING_INTERVAL: Duration = Duration::from_millis(2000);
/// Default number of request bytes exposed to regex matchers
pub const DEFAULT_REGEX_MATCH_BYTES: usize = 10;
/// Default count of leading bytes (SID included) echoed by `ack`
pub const DEFAULT_ACK_LENGTH: usize = 2;

/// Settings of one simulated ECU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuConfig {
    pub name: String,
    pub physical_address: u16,
    /// Address shared with other ECUs for broadcast requests
    pub functional_address: Option<u16>,
    pub pending_interval: Duration,
    pub regex_match_bytes: usize,
    /// Answer unmatched requests with requestOutOfRange
    pub nrc_on_no_match: bool,
    /// SID -> number of leading request bytes echoed by `ack`
    pub ack_lengths: HashMap<u8, usize>,
    /// NRC sent while a previous request is still being handled
    pub busy_nrc: u8,
    /// Look matchers up through the prefix index instead of a linear scan
    pub use_prefix_index: bool,
}

impl EcuConfig {
    pub fn new(name: impl Into<String>, physical_address: u16) -> Self {
        Self {
            name: name.into(),
            physical_address,
            functional_address: None,
            pending_interval: DEFAULT_PENDING_INTERVAL,
            regex_match_bytes: DEFAULT_REGEX_MATCH_BYTES,
            nrc_on_no_match: true,
            ack_lengths: HashMap::new(),
            busy_nrc: nrc::BUSY_REPEAT_REQUEST,
            use_prefix_index: true,
        }
    }

    pub fn with_functional_address(mut self, address: u16) -> Self {
        self.functional_address = Some(address);
        self
    }

    pub fn with_pending_interval(mut self, interval: Duration) -> Self {
        self.pending_interval = interval;
        self
    }

    pub fn with_ack_length(mut self, service_id: u8, length: usize) -> Self {
        self.ack_lengths.insert(service_id, length);
        self
    }

    /// Echo length for `ack` on the given service
    pub fn ack_length(&self, service_id: u8) -> usize {
        self.ack_lengths
            .get(&service_id)
            .copied()
            .unwrap_or(DEFAULT_ACK_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EcuConfig::new("engine", 0x1010);
        assert_eq!(config.pending_interval, Duration::from_secs(2));
        assert_eq!(config.regex_match_bytes, 10);
        assert!(config.nrc_on_no_match);
        assert_eq!(config.busy_nrc, 0x21);
        assert_eq!(config.functional_address, None);
    }

    #[test]
    fn test_ack_length_override() {
        let config = EcuConfig::new("engine", 0x1010).with_ack_length(0x22, 3);
        assert_eq!(config.ack_length(0x22), 3);
        assert_eq!(config.ack_length(0x10), 2);
    }
}
