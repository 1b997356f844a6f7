//! ECU engine errors

use thiserror::Error;

/// Failure raised by a request handler or interceptor.
///
/// Every variant is turned into a negative response for the tester; the
/// request still counts as handled.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Explicit negative response, sent as `[0x7F, SID, code]`
    #[error("Negative response 0x{0:02X}")]
    NegativeResponse(u8),

    /// `ack` asked to echo more request bytes than the request holds
    #[error("Ack length {length} out of range for a {request_len}-byte request")]
    AckLength { length: usize, request_len: usize },

    /// Any other failure, answered with generalProgrammingFailure
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn nrc(code: u8) -> Self {
        Self::NegativeResponse(code)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", err))
    }
}

/// Matcher construction errors
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Invalid regex for matcher '{name}': {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// A response could not be handed to the transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Response channel closed")]
    Closed,
}
