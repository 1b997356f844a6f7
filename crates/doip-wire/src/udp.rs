//! UDP discovery messages

use bytes::{Buf, BufMut, BytesMut};

use crate::frame::{expect_len, put_optional_u32, DoipMessage};
use crate::header::PayloadType;
use crate::{DecodeError, EID_LEN, GID_LEN, VIN_LEN};

/// Vehicle announcement / vehicle identification response (0x0004)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleAnnouncement {
    pub vin: [u8; VIN_LEN],
    pub logical_address: u16,
    pub eid: [u8; EID_LEN],
    pub gid: [u8; GID_LEN],
    pub further_action: u8,
    /// Absent in the 32-byte form of the message
    pub sync_status: Option<u8>,
}

impl VehicleAnnouncement {
    const MIN_LEN: usize = VIN_LEN + 2 + EID_LEN + GID_LEN + 1;

    pub fn vin_string(&self) -> String {
        String::from_utf8_lossy(&self.vin)
            .trim_matches(char::from(0))
            .to_string()
    }
}

/// DoIP entity status response (0x4002)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStatusResponse {
    pub node_type: u8,
    pub max_open_sockets: u8,
    pub currently_open_sockets: u8,
    /// Absent in the 3-byte form of the message
    pub max_data_size: Option<u32>,
}

/// Messages exchanged over UDP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoipUdpMessage {
    HeaderNack { code: u8 },
    VehicleIdentificationRequest,
    VehicleIdentificationRequestWithEid { eid: [u8; EID_LEN] },
    VehicleIdentificationRequestWithVin { vin: [u8; VIN_LEN] },
    VehicleAnnouncement(VehicleAnnouncement),
    EntityStatusRequest,
    EntityStatusResponse(EntityStatusResponse),
    PowerModeRequest,
    PowerModeResponse { power_mode: u8 },
}

impl DoipMessage for DoipUdpMessage {
    fn payload_type(&self) -> PayloadType {
        match self {
            Self::HeaderNack { .. } => PayloadType::HeaderNack,
            Self::VehicleIdentificationRequest => PayloadType::VehicleIdentificationRequest,
            Self::VehicleIdentificationRequestWithEid { .. } => {
                PayloadType::VehicleIdentificationRequestWithEid
            }
            Self::VehicleIdentificationRequestWithVin { .. } => {
                PayloadType::VehicleIdentificationRequestWithVin
            }
            Self::VehicleAnnouncement(_) => PayloadType::VehicleAnnouncement,
            Self::EntityStatusRequest => PayloadType::EntityStatusRequest,
            Self::EntityStatusResponse(_) => PayloadType::EntityStatusResponse,
            Self::PowerModeRequest => PayloadType::PowerModeRequest,
            Self::PowerModeResponse { .. } => PayloadType::PowerModeResponse,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::HeaderNack { .. } | Self::PowerModeResponse { .. } => 1,
            Self::VehicleIdentificationRequest
            | Self::EntityStatusRequest
            | Self::PowerModeRequest => 0,
            Self::VehicleIdentificationRequestWithEid { .. } => EID_LEN,
            Self::VehicleIdentificationRequestWithVin { .. } => VIN_LEN,
            Self::VehicleAnnouncement(vam) => {
                VehicleAnnouncement::MIN_LEN + usize::from(vam.sync_status.is_some())
            }
            Self::EntityStatusResponse(status) => {
                3 + if status.max_data_size.is_some() { 4 } else { 0 }
            }
        }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::HeaderNack { code } => buf.put_u8(*code),
            Self::VehicleIdentificationRequest
            | Self::EntityStatusRequest
            | Self::PowerModeRequest => {}
            Self::VehicleIdentificationRequestWithEid { eid } => buf.put_slice(eid),
            Self::VehicleIdentificationRequestWithVin { vin } => buf.put_slice(vin),
            Self::VehicleAnnouncement(vam) => {
                buf.put_slice(&vam.vin);
                buf.put_u16(vam.logical_address);
                buf.put_slice(&vam.eid);
                buf.put_slice(&vam.gid);
                buf.put_u8(vam.further_action);
                if let Some(sync_status) = vam.sync_status {
                    buf.put_u8(sync_status);
                }
            }
            Self::EntityStatusResponse(status) => {
                buf.put_u8(status.node_type);
                buf.put_u8(status.max_open_sockets);
                buf.put_u8(status.currently_open_sockets);
                put_optional_u32(buf, status.max_data_size);
            }
            Self::PowerModeResponse { power_mode } => buf.put_u8(*power_mode),
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
            PayloadType::VehicleIdentificationRequest => {
                expect_len(payload_type, payload, &[0])?;
                Self::VehicleIdentificationRequest
            }
            PayloadType::VehicleIdentificationRequestWithEid => {
                expect_len(payload_type, payload, &[EID_LEN])?;
                let mut eid = [0u8; EID_LEN];
                buf.copy_to_slice(&mut eid);
                Self::VehicleIdentificationRequestWithEid { eid }
            }
            PayloadType::VehicleIdentificationRequestWithVin => {
                expect_len(payload_type, payload, &[VIN_LEN])?;
                let mut vin = [0u8; VIN_LEN];
                buf.copy_to_slice(&mut vin);
                Self::VehicleIdentificationRequestWithVin { vin }
            }
            PayloadType::VehicleAnnouncement => {
                expect_len(
                    payload_type,
                    payload,
                    &[VehicleAnnouncement::MIN_LEN, VehicleAnnouncement::MIN_LEN + 1],
                )?;
                let mut vin = [0u8; VIN_LEN];
                buf.copy_to_slice(&mut vin);
                let logical_address = buf.get_u16();
                let mut eid = [0u8; EID_LEN];
                buf.copy_to_slice(&mut eid);
                let mut gid = [0u8; GID_LEN];
                buf.copy_to_slice(&mut gid);
                let further_action = buf.get_u8();
                let sync_status = buf.has_remaining().then(|| buf.get_u8());
                Self::VehicleAnnouncement(VehicleAnnouncement {
                    vin,
                    logical_address,
                    eid,
                    gid,
                    further_action,
                    sync_status,
                })
            }
            PayloadType::EntityStatusRequest => {
                expect_len(payload_type, payload, &[0])?;
                Self::EntityStatusRequest
            }
            PayloadType::EntityStatusResponse => {
                expect_len(payload_type, payload, &[3, 7])?;
                Self::EntityStatusResponse(EntityStatusResponse {
                    node_type: buf.get_u8(),
                    max_open_sockets: buf.get_u8(),
                    currently_open_sockets: buf.get_u8(),
                    max_data_size: buf.has_remaining().then(|| buf.get_u32()),
                })
            }
            PayloadType::PowerModeRequest => {
                expect_len(payload_type, payload, &[0])?;
                Self::PowerModeRequest
            }
            PayloadType::PowerModeResponse => {
                expect_len(payload_type, payload, &[1])?;
                Self::PowerModeResponse {
                    power_mode: buf.get_u8(),
                }
            }
            // TCP-only payload types are not valid on the discovery socket
            _ => return Err(DecodeError::UnknownPayloadType(payload_type)),
        };

        Ok(message)
    }
}
