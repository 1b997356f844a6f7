//! Version-carrying frame wrapper

use bytes::{BufMut, Bytes, BytesMut};

use crate::header::{DoipHeader, PayloadType, HEADER_LEN};
use crate::DecodeError;

/// A message family (UDP or TCP) that can be carried in a DoIP frame
pub trait DoipMessage: Sized {
    /// Payload type written into the header
    fn payload_type(&self) -> PayloadType;

    /// Exact payload length in bytes
    fn payload_len(&self) -> usize;

    /// Append the payload bytes to `buf`
    fn write_payload(&self, buf: &mut BytesMut);

    /// Decode a payload of the given type. `payload` holds exactly the
    /// declared number of bytes.
    fn read_payload(payload_type: u16, payload: &[u8]) -> Result<Self, DecodeError>;
}

/// A decoded frame: the message plus the protocol version it travelled with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoipFrame<M> {
    pub version: u8,
    pub message: M,
}

impl<M: DoipMessage> DoipFrame<M> {
    pub fn new(version: u8, message: M) -> Self {
        Self { version, message }
    }

    pub fn header(&self) -> DoipHeader {
        DoipHeader::new(
            self.version,
            self.message.payload_type(),
            self.message.payload_len(),
        )
    }

    /// Serialize header and payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.message.payload_len());
        self.header().write(&mut buf);
        self.message.write_payload(&mut buf);
        buf.freeze()
    }

    /// Decode one complete frame. The buffer must contain exactly one frame
    /// (as a UDP datagram does).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = DoipHeader::parse(bytes)?;
        let available = bytes.len() - HEADER_LEN;
        if available != header.payload_length as usize {
            return Err(DecodeError::InvalidPayloadLength {
                payload_type: header.payload_type,
                declared: header.payload_length,
                available,
            });
        }
        Self::decode_payload(&header, &bytes[HEADER_LEN..])
    }

    /// Decode the payload that follows an already parsed header
    pub fn decode_payload(header: &DoipHeader, payload: &[u8]) -> Result<Self, DecodeError> {
        let message = M::read_payload(header.payload_type, payload)?;
        Ok(Self {
            version: header.version,
            message,
        })
    }
}

/// Fail with `InvalidPayloadLength` unless `payload.len()` is one of `allowed`
pub(crate) fn expect_len(
    payload_type: u16,
    payload: &[u8],
    allowed: &[usize],
) -> Result<(), DecodeError> {
    if allowed.contains(&payload.len()) {
        Ok(())
    } else {
        Err(invalid_len(payload_type, payload))
    }
}

/// Fail with `InvalidPayloadLength` if `payload` is shorter than `min`
pub(crate) fn expect_min_len(
    payload_type: u16,
    payload: &[u8],
    min: usize,
) -> Result<(), DecodeError> {
    if payload.len() >= min {
        Ok(())
    } else {
        Err(invalid_len(payload_type, payload))
    }
}

fn invalid_len(payload_type: u16, payload: &[u8]) -> DecodeError {
    DecodeError::InvalidPayloadLength {
        payload_type,
        declared: payload.len() as u32,
        available: payload.len(),
    }
}

pub(crate) fn put_optional_u32(buf: &mut BytesMut, value: Option<u32>) {
    if let Some(value) = value {
        buf.put_u32(value);
    }
}
