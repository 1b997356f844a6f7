//! UDS response helpers
//!
//! Only the codes the dispatch engine produces on its own are named here;
//! handlers may send any byte as an NRC.

use std::fmt;

/// Service identifier of a negative response
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// Offset added to the request SID in a positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// UDS Negative Response Codes
pub mod nrc {
    pub const GENERAL_REJECT: u8 = 0x10;
    pub const SERVICE_NOT_SUPPORTED: u8 = 0x11;
    pub const SUB_FUNCTION_NOT_SUPPORTED: u8 = 0x12;
    pub const INCORRECT_MESSAGE_LENGTH: u8 = 0x13;
    pub const BUSY_REPEAT_REQUEST: u8 = 0x21;
    pub const CONDITIONS_NOT_CORRECT: u8 = 0x22;
    pub const REQUEST_SEQUENCE_ERROR: u8 = 0x24;
    pub const REQUEST_OUT_OF_RANGE: u8 = 0x31;
    pub const SECURITY_ACCESS_DENIED: u8 = 0x33;
    pub const INVALID_KEY: u8 = 0x35;
    pub const GENERAL_PROGRAMMING_FAILURE: u8 = 0x72;
    pub const RESPONSE_PENDING: u8 = 0x78;
}

/// Named view of an NRC byte, used for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    GeneralProgrammingFailure,
    ResponsePending,
    Other(u8),
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            nrc::GENERAL_REJECT => Self::GeneralReject,
            nrc::SERVICE_NOT_SUPPORTED => Self::ServiceNotSupported,
            nrc::SUB_FUNCTION_NOT_SUPPORTED => Self::SubFunctionNotSupported,
            nrc::INCORRECT_MESSAGE_LENGTH => Self::IncorrectMessageLengthOrFormat,
            nrc::BUSY_REPEAT_REQUEST => Self::BusyRepeatRequest,
            nrc::CONDITIONS_NOT_CORRECT => Self::ConditionsNotCorrect,
            nrc::REQUEST_SEQUENCE_ERROR => Self::RequestSequenceError,
            nrc::REQUEST_OUT_OF_RANGE => Self::RequestOutOfRange,
            nrc::SECURITY_ACCESS_DENIED => Self::SecurityAccessDenied,
            nrc::INVALID_KEY => Self::InvalidKey,
            nrc::GENERAL_PROGRAMMING_FAILURE => Self::GeneralProgrammingFailure,
            nrc::RESPONSE_PENDING => Self::ResponsePending,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self {
            Self::GeneralReject => "General reject",
            Self::ServiceNotSupported => "Service not supported",
            Self::SubFunctionNotSupported => "Sub-function not supported",
            Self::IncorrectMessageLengthOrFormat => "Incorrect message length or format",
            Self::BusyRepeatRequest => "Busy, repeat request",
            Self::ConditionsNotCorrect => "Conditions not correct",
            Self::RequestSequenceError => "Request sequence error",
            Self::RequestOutOfRange => "Request out of range",
            Self::SecurityAccessDenied => "Security access denied",
            Self::InvalidKey => "Invalid key",
            Self::GeneralProgrammingFailure => "General programming failure",
            Self::ResponsePending => "Request correctly received, response pending",
            Self::Other(code) => return write!(f, "NRC 0x{:02X}", code),
        };
        write!(f, "{}", desc)
    }
}

/// Create a positive response for a service
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id.wrapping_add(POSITIVE_RESPONSE_OFFSET));
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, code: u8) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE_SID, service_id, code]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_response() {
        assert_eq!(positive_response(0x10, &[0x01]), vec![0x50, 0x01]);
        // 0xFF + 0x40 wraps instead of overflowing
        assert_eq!(positive_response(0xFF, &[]), vec![0x3F]);
    }

    #[test]
    fn test_negative_response() {
        assert_eq!(
            negative_response(0x22, nrc::REQUEST_OUT_OF_RANGE),
            vec![0x7F, 0x22, 0x31]
        );
    }

    #[test]
    fn test_nrc_display() {
        assert_eq!(
            NegativeResponseCode::from(0x78).to_string(),
            "Request correctly received, response pending"
        );
        assert_eq!(NegativeResponseCode::from(0x99).to_string(), "NRC 0x99");
    }
}
