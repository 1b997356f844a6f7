//! UDP discovery: vehicle identification, entity status and power mode

use std::sync::Arc;

use doip_wire::codes::{further_action, power_mode, sync_status};
use doip_wire::{
    DecodeError, DoipFrame, DoipHeader, DoipUdpMessage, EntityStatusResponse, VehicleAnnouncement,
};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::entity::EntityState;

/// Largest UDP payload, so datagrams are never truncated
const MAX_DATAGRAM: usize = u16::MAX as usize;

/// Answer discovery datagrams until the task is aborted
pub(crate) async fn serve_udp(socket: Arc<UdpSocket>, state: Arc<EntityState>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                // ICMP errors from earlier sends surface here; keep serving
                debug!(entity = %state.config.name, error = %err, "UDP receive failed");
                continue;
            }
        };

        for reply in handle_datagram(&state, &buf[..len]) {
            trace!(entity = %state.config.name, %peer, message = ?reply.message, "UDP reply");
            if let Err(err) = socket.send_to(&reply.encode(), peer).await {
                warn!(entity = %state.config.name, %peer, error = %err, "UDP send failed");
            }
        }
    }
}

/// Broadcast the configured number of vehicle announcements, then finish
pub(crate) async fn announce(socket: Arc<UdpSocket>, state: Arc<EntityState>) {
    let config = &state.config;
    let frames: Vec<Vec<u8>> = announcements(&state)
        .into_iter()
        .map(|vam| {
            DoipFrame::new(config.protocol_version, DoipUdpMessage::VehicleAnnouncement(vam))
                .encode()
                .to_vec()
        })
        .collect();

    for round in 0..config.announce_count {
        if round > 0 {
            tokio::time::sleep(config.announce_interval).await;
        }
        for frame in &frames {
            if let Err(err) = socket.send_to(frame, config.announce_address).await {
                warn!(
                    entity = %config.name,
                    destination = %config.announce_address,
                    error = %err,
                    "Vehicle announcement failed"
                );
            }
        }
        debug!(entity = %config.name, round = round + 1, "Vehicle announcement sent");
    }
}

/// Replies for one received datagram. Malformed input gets a header nack;
/// messages the entity does not serve are ignored.
pub(crate) fn handle_datagram(state: &EntityState, datagram: &[u8]) -> Vec<DoipFrame<DoipUdpMessage>> {
    let version = state.config.protocol_version;
    let request = match decode_datagram(datagram, state.config.max_payload_size) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(entity = %state.config.name, error = %err, "Invalid datagram");
            return vec![DoipFrame::new(
                version,
                DoipUdpMessage::HeaderNack {
                    code: err.header_nack_code(),
                },
            )];
        }
    };

    let replies: Vec<DoipUdpMessage> = match request.message {
        DoipUdpMessage::VehicleIdentificationRequest => announcements(state)
            .into_iter()
            .map(DoipUdpMessage::VehicleAnnouncement)
            .collect(),
        DoipUdpMessage::VehicleIdentificationRequestWithEid { eid } => announcements(state)
            .into_iter()
            .filter(|vam| vam.eid == eid)
            .map(DoipUdpMessage::VehicleAnnouncement)
            .collect(),
        DoipUdpMessage::VehicleIdentificationRequestWithVin { vin } => announcements(state)
            .into_iter()
            .filter(|vam| vam.vin == vin)
            .map(DoipUdpMessage::VehicleAnnouncement)
            .collect(),
        DoipUdpMessage::EntityStatusRequest => {
            let config = &state.config;
            vec![DoipUdpMessage::EntityStatusResponse(EntityStatusResponse {
                node_type: config.node_type.code(),
                max_open_sockets: config.max_connections,
                currently_open_sockets: u8::try_from(state.connections.open_count())
                    .unwrap_or(u8::MAX),
                max_data_size: Some(config.max_payload_size),
            })]
        }
        DoipUdpMessage::PowerModeRequest => vec![DoipUdpMessage::PowerModeResponse {
            power_mode: power_mode::READY,
        }],
        other => {
            trace!(entity = %state.config.name, message = ?other, "Ignoring datagram");
            Vec::new()
        }
    };

    replies
        .into_iter()
        .map(|message| DoipFrame::new(version, message))
        .collect()
}

/// Header checks in nack order (pattern, payload type, size), then the body
fn decode_datagram(
    datagram: &[u8],
    max_payload: u32,
) -> Result<DoipFrame<DoipUdpMessage>, DecodeError> {
    let header = DoipHeader::parse(datagram)?;
    header.known_payload_type()?;
    header.check_max_length(max_payload)?;
    DoipFrame::decode(datagram)
}

/// The entity's own announcement followed by those of its ECUs
fn announcements(state: &EntityState) -> Vec<VehicleAnnouncement> {
    let config = &state.config;
    let own = VehicleAnnouncement {
        vin: config.vin,
        logical_address: config.logical_address,
        eid: config.eid,
        gid: config.gid,
        further_action: further_action::NONE,
        sync_status: Some(sync_status::SYNCHRONIZED),
    };

    std::iter::once(own)
        .chain(config.ecus.iter().filter_map(|ecu| {
            ecu.additional_vam.as_ref().map(|vam| VehicleAnnouncement {
                vin: vam.vin,
                logical_address: vam.logical_address,
                eid: vam.eid,
                gid: vam.gid,
                further_action: further_action::NONE,
                sync_status: Some(sync_status::SYNCHRONIZED),
            })
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sim_ecu::EcuConfig;

    use crate::config::{AdditionalVam, EcuDefinition, EntityConfig};
    use crate::entity::{EntityOptions, SimEntity};

    const ENGINE_VIN: &[u8; 17] = b"WBA00000000000002";

    fn entity() -> Arc<SimEntity> {
        let mut engine = EcuDefinition::from(EcuConfig::new("engine", 0x1011));
        engine.additional_vam = Some(AdditionalVam {
            logical_address: 0x1011,
            vin: *ENGINE_VIN,
            eid: [0x11; 6],
            gid: [0x90; 6],
        });
        let config = EntityConfig::new("gateway", 0x1010, "WBA00000000000001", [0x10; 6], [0x90; 6])
            .unwrap()
            .with_ecu(EcuConfig::new("gateway", 0x1010))
            .with_ecu(engine);
        SimEntity::new(config, EntityOptions::default()).unwrap()
    }

    fn request(message: DoipUdpMessage) -> Vec<u8> {
        DoipFrame::new(0xFF, message).encode().to_vec()
    }

    fn announced_addresses(replies: &[DoipFrame<DoipUdpMessage>]) -> Vec<u16> {
        replies
            .iter()
            .filter_map(|frame| match &frame.message {
                DoipUdpMessage::VehicleAnnouncement(vam) => Some(vam.logical_address),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_identification_lists_everything() {
        let entity = entity();
        let replies = handle_datagram(
            entity.state(),
            &request(DoipUdpMessage::VehicleIdentificationRequest),
        );
        assert_eq!(announced_addresses(&replies), vec![0x1010, 0x1011]);
        assert!(replies.iter().all(|frame| frame.version == 0x02));
    }

    #[test]
    fn test_identification_by_eid_and_vin() {
        let entity = entity();
        let by_eid = handle_datagram(
            entity.state(),
            &request(DoipUdpMessage::VehicleIdentificationRequestWithEid { eid: [0x11; 6] }),
        );
        assert_eq!(announced_addresses(&by_eid), vec![0x1011]);

        let by_vin = handle_datagram(
            entity.state(),
            &request(DoipUdpMessage::VehicleIdentificationRequestWithVin { vin: *ENGINE_VIN }),
        );
        assert_eq!(announced_addresses(&by_vin), vec![0x1011]);

        let unknown = handle_datagram(
            entity.state(),
            &request(DoipUdpMessage::VehicleIdentificationRequestWithVin { vin: [b'X'; 17] }),
        );
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_entity_status() {
        let entity = entity();
        let _open = entity.state().connections.open();
        let replies = handle_datagram(
            entity.state(),
            &request(DoipUdpMessage::EntityStatusRequest),
        );
        assert_eq!(
            replies[0].message,
            DoipUdpMessage::EntityStatusResponse(EntityStatusResponse {
                node_type: 0x00,
                max_open_sockets: 8,
                currently_open_sockets: 1,
                max_data_size: Some(0xFFFF),
            })
        );
    }

    #[test]
    fn test_power_mode() {
        let entity = entity();
        let replies = handle_datagram(entity.state(), &request(DoipUdpMessage::PowerModeRequest));
        assert_eq!(
            replies[0].message,
            DoipUdpMessage::PowerModeResponse { power_mode: 0x01 }
        );
    }

    #[test]
    fn test_malformed_datagram_gets_header_nack() {
        let entity = entity();
        let replies = handle_datagram(entity.state(), &[0x02, 0xFE, 0x00, 0x01, 0, 0, 0, 0]);
        assert_eq!(replies[0].message, DoipUdpMessage::HeaderNack { code: 0x00 });

        let replies = handle_datagram(entity.state(), &[0x02, 0xFD, 0x12, 0x34, 0, 0, 0, 0]);
        assert_eq!(replies[0].message, DoipUdpMessage::HeaderNack { code: 0x01 });
    }

    #[test]
    fn test_oversized_datagram_gets_message_too_large() {
        let mut config =
            EntityConfig::new("gateway", 0x1010, "WBA00000000000001", [0x10; 6], [0x90; 6])
                .unwrap()
                .with_ecu(EcuConfig::new("gateway", 0x1010));
        config.max_payload_size = 4096;
        let entity = SimEntity::new(config, EntityOptions::default()).unwrap();

        let mut datagram = vec![0x02, 0xFD, 0x00, 0x01, 0x00, 0x00, 0x17, 0x70];
        datagram.resize(8 + 6000, 0);
        let replies = handle_datagram(entity.state(), &datagram);
        assert_eq!(replies[0].message, DoipUdpMessage::HeaderNack { code: 0x02 });

        // Unknown payload type is reported before the size
        datagram[2..4].copy_from_slice(&[0x12, 0x34]);
        let replies = handle_datagram(entity.state(), &datagram);
        assert_eq!(replies[0].message, DoipUdpMessage::HeaderNack { code: 0x01 });
    }

    #[test]
    fn test_announcements_ignored() {
        let entity = entity();
        let own = request(DoipUdpMessage::VehicleAnnouncement(
            announcements(entity.state()).remove(0),
        ));
        assert!(handle_datagram(entity.state(), &own).is_empty());
    }
}
