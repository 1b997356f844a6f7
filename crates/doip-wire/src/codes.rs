//! ISO 13400-2 constant tables

/// Default protocol version (ISO 13400-2:2012)
pub const DEFAULT_PROTOCOL_VERSION: u8 = 0x02;

/// Version byte a tester may use for vehicle identification requests
pub const VIR_DEFAULT_PROTOCOL_VERSION: u8 = 0xFF;

/// Generic DoIP header negative acknowledge codes
pub mod header_nack {
    pub const INCORRECT_PATTERN_FORMAT: u8 = 0x00;
    pub const UNKNOWN_PAYLOAD_TYPE: u8 = 0x01;
    pub const MESSAGE_TOO_LARGE: u8 = 0x02;
    pub const OUT_OF_MEMORY: u8 = 0x03;
    pub const INVALID_PAYLOAD_LENGTH: u8 = 0x04;
}

/// Routing activation types
pub mod activation_type {
    pub const DEFAULT: u8 = 0x00;
    pub const WWH_OBD: u8 = 0x01;
    pub const CENTRAL_SECURITY: u8 = 0xE0;
}

/// Routing activation response codes
pub mod activation_code {
    pub const UNKNOWN_SOURCE_ADDRESS: u8 = 0x00;
    pub const TCP_DATA_SOCKETS_EXHAUSTED: u8 = 0x01;
    pub const DIFFERENT_SOURCE_ADDRESS: u8 = 0x02;
    pub const SOURCE_ADDRESS_ALREADY_ACTIVE: u8 = 0x03;
    pub const MISSING_AUTHENTICATION: u8 = 0x04;
    pub const REJECTED_CONFIRMATION: u8 = 0x05;
    pub const UNSUPPORTED_ACTIVATION_TYPE: u8 = 0x06;
    pub const REQUIRES_TLS: u8 = 0x07;
    pub const OK: u8 = 0x10;
    pub const CONFIRMATION_REQUIRED: u8 = 0x11;
}

/// Diagnostic message positive acknowledge code
pub const DIAGNOSTIC_ACK: u8 = 0x00;

/// Diagnostic message negative acknowledge codes
pub mod diagnostic_nack {
    pub const INVALID_SOURCE_ADDRESS: u8 = 0x02;
    pub const UNKNOWN_TARGET_ADDRESS: u8 = 0x03;
    pub const MESSAGE_TOO_LARGE: u8 = 0x04;
    pub const OUT_OF_MEMORY: u8 = 0x05;
    pub const TARGET_UNREACHABLE: u8 = 0x06;
    pub const UNKNOWN_NETWORK: u8 = 0x07;
    pub const TRANSPORT_PROTOCOL_ERROR: u8 = 0x08;
}

/// Entity status node types
pub mod node_type {
    pub const GATEWAY: u8 = 0x00;
    pub const NODE: u8 = 0x01;
}

/// Diagnostic power mode values
pub mod power_mode {
    pub const NOT_READY: u8 = 0x00;
    pub const READY: u8 = 0x01;
    pub const NOT_SUPPORTED: u8 = 0x02;
}

/// Vehicle announcement further action codes
pub mod further_action {
    pub const NONE: u8 = 0x00;
    pub const ROUTING_ACTIVATION_REQUIRED: u8 = 0x10;
}

/// Vehicle announcement VIN/GID sync status
pub mod sync_status {
    pub const SYNCHRONIZED: u8 = 0x00;
    pub const INCOMPLETE: u8 = 0x10;
}
