//! Frame decoding errors

use thiserror::Error;

use crate::codes::header_nack;

/// Reasons a byte sequence is not a valid DoIP frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Header too short: {available} bytes available, 8 required")]
    HeaderTooShort { available: usize },

    #[error("Incorrect pattern format: version 0x{version:02X}, inverse version 0x{inverse:02X}")]
    IncorrectPatternFormat { version: u8, inverse: u8 },

    #[error("Invalid payload length {declared} for payload type 0x{payload_type:04X} ({available} bytes available)")]
    InvalidPayloadLength {
        payload_type: u16,
        declared: u32,
        available: usize,
    },

    #[error("Unknown payload type 0x{0:04X}")]
    UnknownPayloadType(u16),

    #[error("Message too large: {declared} bytes exceeds maximum of {max}")]
    MessageTooLarge { declared: u32, max: u32 },
}

impl DecodeError {
    /// Generic header negative acknowledge code sent back to the peer
    pub fn header_nack_code(&self) -> u8 {
        match self {
            Self::HeaderTooShort { .. } | Self::IncorrectPatternFormat { .. } => {
                header_nack::INCORRECT_PATTERN_FORMAT
            }
            Self::UnknownPayloadType(_) => header_nack::UNKNOWN_PAYLOAD_TYPE,
            Self::MessageTooLarge { .. } => header_nack::MESSAGE_TOO_LARGE,
            Self::InvalidPayloadLength { .. } => header_nack::INVALID_PAYLOAD_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_code_mapping() {
        assert_eq!(
            DecodeError::IncorrectPatternFormat {
                version: 0x02,
                inverse: 0xFE
            }
            .header_nack_code(),
            0x00
        );
        assert_eq!(
            DecodeError::HeaderTooShort { available: 5 }.header_nack_code(),
            0x00
        );
        assert_eq!(DecodeError::UnknownPayloadType(0x1234).header_nack_code(), 0x01);
        assert_eq!(
            DecodeError::MessageTooLarge {
                declared: 70000,
                max: 4096
            }
            .header_nack_code(),
            0x02
        );
        assert_eq!(
            DecodeError::InvalidPayloadLength {
                payload_type: 0x8001,
                declared: 2,
                available: 2
            }
            .header_nack_code(),
            0x04
        );
    }
}
