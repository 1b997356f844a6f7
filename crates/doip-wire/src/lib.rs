//! doip-wire - ISO 13400-2 frame codec
//!
//! Encodes and decodes the DoIP generic header and every UDP/TCP payload
//! type the simulator speaks.
//!
//! # Frame layout
//!
//! ```text
//! ┌─────────┬─────────────┬──────────────┬────────────────┬─────────────┐
//! │ version │ inv.version │ payload type │ payload length │ payload ... │
//! │  1 byte │    1 byte   │  2 bytes BE  │   4 bytes BE   │  N bytes    │
//! └─────────┴─────────────┴──────────────┴────────────────┴─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`header`] - Generic header parsing and the payload type table
//! - [`codes`] - Response, nack, activation and node-type constants
//! - [`udp`] - Discovery messages (vehicle identification, status, power mode)
//! - [`tcp`] - Routing activation, alive check and diagnostic messages
//! - [`frame`] - Version-carrying frame wrapper with encode/decode

pub mod codes;
pub mod error;
pub mod frame;
pub mod header;
pub mod tcp;
pub mod udp;

pub use error::DecodeError;
pub use frame::{DoipFrame, DoipMessage};
pub use header::{DoipHeader, PayloadType, HEADER_LEN};
pub use tcp::{
    DiagnosticMessage, DiagnosticMessageAck, DoipTcpMessage, RoutingActivationRequest,
    RoutingActivationResponse,
};
pub use udp::{DoipUdpMessage, EntityStatusResponse, VehicleAnnouncement};

/// Length of a vehicle identification number
pub const VIN_LEN: usize = 17;
/// Length of an entity identifier (usually the MAC address)
pub const EID_LEN: usize = 6;
/// Length of a group identifier
pub const GID_LEN: usize = 6;

/// Default UDP/TCP port for DoIP
pub const DOIP_PORT: u16 = 13400;
/// Default TCP port for DoIP over TLS
pub const DOIP_TLS_PORT: u16 = 3496;
