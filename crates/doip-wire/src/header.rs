//! Generic DoIP header

use bytes::{Buf, BufMut};

use crate::DecodeError;

/// Generic header size in bytes
pub const HEADER_LEN: usize = 8;

/// DoIP payload types handled by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PayloadType {
    HeaderNack = 0x0000,
    VehicleIdentificationRequest = 0x0001,
    VehicleIdentificationRequestWithEid = 0x0002,
    VehicleIdentificationRequestWithVin = 0x0003,
    VehicleAnnouncement = 0x0004,
    RoutingActivationRequest = 0x0005,
    RoutingActivationResponse = 0x0006,
    AliveCheckRequest = 0x0007,
    AliveCheckResponse = 0x0008,
    EntityStatusRequest = 0x4001,
    EntityStatusResponse = 0x4002,
    PowerModeRequest = 0x4003,
    PowerModeResponse = 0x4004,
    DiagnosticMessage = 0x8001,
    DiagnosticMessageAck = 0x8002,
    DiagnosticMessageNack = 0x8003,
}

impl PayloadType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::HeaderNack),
            0x0001 => Some(Self::VehicleIdentificationRequest),
            0x0002 => Some(Self::VehicleIdentificationRequestWithEid),
            0x0003 => Some(Self::VehicleIdentificationRequestWithVin),
            0x0004 => Some(Self::VehicleAnnouncement),
            0x0005 => Some(Self::RoutingActivationRequest),
            0x0006 => Some(Self::RoutingActivationResponse),
            0x0007 => Some(Self::AliveCheckRequest),
            0x0008 => Some(Self::AliveCheckResponse),
            0x4001 => Some(Self::EntityStatusRequest),
            0x4002 => Some(Self::EntityStatusResponse),
            0x4003 => Some(Self::PowerModeRequest),
            0x4004 => Some(Self::PowerModeResponse),
            0x8001 => Some(Self::DiagnosticMessage),
            0x8002 => Some(Self::DiagnosticMessageAck),
            0x8003 => Some(Self::DiagnosticMessageNack),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Parsed generic header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoipHeader {
    /// Protocol version; the inverse byte is always derived from it
    pub version: u8,
    /// Raw payload type (may be unknown to this codec)
    pub payload_type: u16,
    /// Declared payload length
    pub payload_length: u32,
}

impl DoipHeader {
    pub fn new(version: u8, payload_type: PayloadType, payload_length: usize) -> Self {
        Self {
            version,
            payload_type: payload_type.code(),
            payload_length: payload_length as u32,
        }
    }

    /// Parse the first 8 bytes of `buf`.
    ///
    /// Only the sync pattern is validated here; the payload type and length
    /// are checked by the message decoders.
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::HeaderTooShort {
                available: buf.len(),
            });
        }

        let mut cursor = &buf[..HEADER_LEN];
        let version = cursor.get_u8();
        let inverse = cursor.get_u8();
        if inverse != !version {
            return Err(DecodeError::IncorrectPatternFormat { version, inverse });
        }

        Ok(Self {
            version,
            payload_type: cursor.get_u16(),
            payload_length: cursor.get_u32(),
        })
    }

    /// Reject payloads above `max` bytes before they are read
    pub fn check_max_length(&self, max: u32) -> Result<(), DecodeError> {
        if self.payload_length > max {
            return Err(DecodeError::MessageTooLarge {
                declared: self.payload_length,
                max,
            });
        }
        Ok(())
    }

    pub fn known_payload_type(&self) -> Result<PayloadType, DecodeError> {
        PayloadType::from_u16(self.payload_type)
            .ok_or(DecodeError::UnknownPayloadType(self.payload_type))
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(!self.version);
        buf.put_u16(self.payload_type);
        buf.put_u32(self.payload_length);
    }
}
