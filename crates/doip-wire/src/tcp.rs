//! TCP data messages

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::{expect_len, expect_min_len, put_optional_u32, DoipMessage};
use crate::header::PayloadType;
use crate::DecodeError;

/// Routing activation request (0x0005)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingActivationRequest {
    pub source_address: u16,
    pub activation_type: u8,
    pub reserved: u32,
    pub oem_data: Option<u32>,
}

/// Routing activation response (0x0006)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingActivationResponse {
    pub tester_address: u16,
    pub entity_address: u16,
    pub response_code: u8,
    pub reserved: u32,
    pub oem_data: Option<u32>,
}

/// Diagnostic message (0x8001)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub source_address: u16,
    pub target_address: u16,
    pub payload: Bytes,
}

/// Diagnostic message positive (0x8002) or negative (0x8003) acknowledge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessageAck {
    pub source_address: u16,
    pub target_address: u16,
    pub code: u8,
    /// Optional copy of the acknowledged diagnostic message
    pub previous_message: Bytes,
}

/// Messages exchanged over a TCP data connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoipTcpMessage {
    HeaderNack { code: u8 },
    RoutingActivationRequest(RoutingActivationRequest),
    RoutingActivationResponse(RoutingActivationResponse),
    AliveCheckRequest,
    AliveCheckResponse { source_address: u16 },
    DiagnosticMessage(DiagnosticMessage),
    DiagnosticMessageAck(DiagnosticMessageAck),
    DiagnosticMessageNack(DiagnosticMessageAck),
}

impl DoipMessage for DoipTcpMessage {
    fn payload_type(&self) -> PayloadType {
        match self {
            Self::HeaderNack { .. } => PayloadType::HeaderNack,
            Self::RoutingActivationRequest(_) => PayloadType::RoutingActivationRequest,
            Self::RoutingActivationResponse(_) => PayloadType::RoutingActivationResponse,
            Self::AliveCheckRequest => PayloadType::AliveCheckRequest,
            Self::AliveCheckResponse { .. } => PayloadType::AliveCheckResponse,
            Self::DiagnosticMessage(_) => PayloadType::DiagnosticMessage,
            Self::DiagnosticMessageAck(_) => PayloadType::DiagnosticMessageAck,
            Self::DiagnosticMessageNack(_) => PayloadType::DiagnosticMessageNack,
        }
    }

    fn payload_len(&self) -> usize {
        let oem = |data: &Option<u32>| if data.is_some() { 4 } else { 0 };
        match self {
            Self::HeaderNack { .. } => 1,
            Self::RoutingActivationRequest(req) => 7 + oem(&req.oem_data),
            Self::RoutingActivationResponse(res) => 9 + oem(&res.oem_data),
            Self::AliveCheckRequest => 0,
            Self::AliveCheckResponse { .. } => 2,
            Self::DiagnosticMessage(msg) => 4 + msg.payload.len(),
            Self::DiagnosticMessageAck(ack) | Self::DiagnosticMessageNack(ack) => {
                5 + ack.previous_message.len()
            }
        }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::HeaderNack { code } => buf.put_u8(*code),
            Self::RoutingActivationRequest(req) => {
                buf.put_u16(req.source_address);
                buf.put_u8(req.activation_type);
                buf.put_u32(req.reserved);
                put_optional_u32(buf, req.oem_data);
            }
            Self::RoutingActivationResponse(res) => {
                buf.put_u16(res.tester_address);
                buf.put_u16(res.entity_address);
                buf.put_u8(res.response_code);
                buf.put_u32(res.reserved);
                put_optional_u32(buf, res.oem_data);
            }
            Self::AliveCheckRequest => {}
            Self::AliveCheckResponse { source_address } => buf.put_u16(*source_address),
            Self::DiagnosticMessage(msg) => {
                buf.put_u16(msg.source_address);
                buf.put_u16(msg.target_address);
                buf.put_slice(&msg.payload);
            }
            Self::DiagnosticMessageAck(ack) | Self::DiagnosticMessageNack(ack) => {
                buf.put_u16(ack.source_address);
                buf.put_u16(ack.target_address);
                buf.put_u8(ack.code);
                buf.put_slice(&ack.previous_message);
            }
        }
    }

    fn read_payload(payload_type: u16, payload: &[u8]) -> Result<Self, DecodeError> {
        let known = PayloadType::from_u16(payload_type)
            .ok_or(DecodeError::UnknownPayloadType(payload_type))?;
        let mut buf = payload;

        let message = match known {
            PayloadType::HeaderNack => {
                expect_len(payload_type, payload, &[1])?;
                Self::HeaderNack { code: buf.get_u8() }
            }
            PayloadType::RoutingActivationRequest => {
                expect_len(payload_type, payload, &[7, 11])?;
                Self::RoutingActivationRequest(RoutingActivationRequest {
                    source_address: buf.get_u16(),
                    activation_type: buf.get_u8(),
                    reserved: buf.get_u32(),
                    oem_data: buf.has_remaining().then(|| buf.get_u32()),
                })
            }
            PayloadType::RoutingActivationResponse => {
                expect_len(payload_type, payload, &[9, 13])?;
                Self::RoutingActivationResponse(RoutingActivationResponse {
                    tester_address: buf.get_u16(),
                    entity_address: buf.get_u16(),
                    response_code: buf.get_u8(),
                    reserved: buf.get_u32(),
                    oem_data: buf.has_remaining().then(|| buf.get_u32()),
                })
            }
            PayloadType::AliveCheckRequest => {
                expect_len(payload_type, payload, &[0])?;
                Self::AliveCheckRequest
            }
            PayloadType::AliveCheckResponse => {
                expect_len(payload_type, payload, &[2])?;
                Self::AliveCheckResponse {
                    source_address: buf.get_u16(),
                }
            }
            PayloadType::DiagnosticMessage => {
                expect_min_len(payload_type, payload, 4)?;
                Self::DiagnosticMessage(DiagnosticMessage {
                    source_address: buf.get_u16(),
                    target_address: buf.get_u16(),
                    payload: Bytes::copy_from_slice(buf),
                })
            }
            PayloadType::DiagnosticMessageAck | PayloadType::DiagnosticMessageNack => {
                expect_min_len(payload_type, payload, 5)?;
                let ack = DiagnosticMessageAck {
                    source_address: buf.get_u16(),
                    target_address: buf.get_u16(),
                    code: buf.get_u8(),
                    previous_message: Bytes::copy_from_slice(buf),
                };
                if known == PayloadType::DiagnosticMessageAck {
                    Self::DiagnosticMessageAck(ack)
                } else {
                    Self::DiagnosticMessageNack(ack)
                }
            }
            // Discovery payload types are not valid on a data connection
            _ => return Err(DecodeError::UnknownPayloadType(payload_type)),
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{activation_code, activation_type, diagnostic_nack};
    use crate::DoipFrame;
    use pretty_assertions::assert_eq;

    fn roundtrip(message: DoipTcpMessage) {
        let frame = DoipFrame::new(0x02, message);
        let bytes = frame.encode();
        assert_eq!(DoipFrame::<DoipTcpMessage>::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_routing_activation_request_layout() {
        let bytes = [
            0x02, 0xFD, 0x00, 0x05, 0x00, 0x00, 0x00, 0x07, 0x0E, 0x80, 0x00, 0x00, 0x00, 0x00,
            0x00,
        ];
        let frame = DoipFrame::<DoipTcpMessage>::decode(&bytes).unwrap();
        assert_eq!(
            frame.message,
            DoipTcpMessage::RoutingActivationRequest(RoutingActivationRequest {
                source_address: 0x0E80,
                activation_type: activation_type::DEFAULT,
                reserved: 0,
                oem_data: None,
            })
        );
        assert_eq!(frame.encode().as_ref(), &bytes[..]);
    }

    #[test]
    fn test_routing_activation_with_oem_data() {
        roundtrip(DoipTcpMessage::RoutingActivationRequest(
            RoutingActivationRequest {
                source_address: 0x0E00,
                activation_type: activation_type::WWH_OBD,
                reserved: 0,
                oem_data: Some(0xDEADBEEF),
            },
        ));
        roundtrip(DoipTcpMessage::RoutingActivationResponse(
            RoutingActivationResponse {
                tester_address: 0x0E00,
                entity_address: 0x1010,
                response_code: activation_code::OK,
                reserved: 0,
                oem_data: Some(1),
            },
        ));
    }

    #[test]
    fn test_routing_activation_bad_length() {
        let bytes = [0x02, 0xFD, 0x00, 0x05, 0x00, 0x00, 0x00, 0x03, 0x0E, 0x80, 0x00];
        assert!(matches!(
            DoipFrame::<DoipTcpMessage>::decode(&bytes),
            Err(DecodeError::InvalidPayloadLength { .. })
        ));
    }

    #[test]
    fn test_diagnostic_message_layout() {
        let frame = DoipFrame::new(
            0x02,
            DoipTcpMessage::DiagnosticMessage(DiagnosticMessage {
                source_address: 0x0E80,
                target_address: 0x1010,
                payload: Bytes::from_static(&[0x10, 0x01]),
            }),
        );
        assert_eq!(
            frame.encode().as_ref(),
            &[0x02, 0xFD, 0x80, 0x01, 0x00, 0x00, 0x00, 0x06, 0x0E, 0x80, 0x10, 0x10, 0x10, 0x01]
        );
    }

    #[test]
    fn test_ack_and_nack_roundtrip() {
        roundtrip(DoipTcpMessage::DiagnosticMessageAck(DiagnosticMessageAck {
            source_address: 0x1010,
            target_address: 0x0E80,
            code: 0x00,
            previous_message: Bytes::new(),
        }));
        roundtrip(DoipTcpMessage::DiagnosticMessageNack(DiagnosticMessageAck {
            source_address: 0x1010,
            target_address: 0x0E80,
            code: diagnostic_nack::UNKNOWN_TARGET_ADDRESS,
            previous_message: Bytes::from_static(&[0x22, 0xF1, 0x90]),
        }));
    }

    #[test]
    fn test_alive_check() {
        roundtrip(DoipTcpMessage::AliveCheckRequest);
        roundtrip(DoipTcpMessage::AliveCheckResponse {
            source_address: 0x1010,
        });
    }

    #[test]
    fn test_unknown_type() {
        let bytes = [0x02, 0xFD, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            DoipFrame::<DoipTcpMessage>::decode(&bytes),
            Err(DecodeError::UnknownPayloadType(0x1234))
        );
    }

    #[test]
    fn test_udp_type_rejected_on_tcp() {
        let bytes = [0x02, 0xFD, 0x40, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            DoipFrame::<DoipTcpMessage>::decode(&bytes),
            Err(DecodeError::UnknownPayloadType(0x4001))
        );
    }
}
