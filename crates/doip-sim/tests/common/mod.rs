//! Tester-side helpers for driving a simulated entity over real sockets

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use doip_sim::frame_io::read_frame;
use doip_sim::{BoundAddresses, EntityConfig, EntityOptions, SimEntity};
use doip_wire::{
    DiagnosticMessage, DoipFrame, DoipTcpMessage, DoipUdpMessage, RoutingActivationRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

pub const TESTER: u16 = 0x0E80;
pub const GATEWAY: u16 = 0x1010;
pub const ENGINE: u16 = 0x1011;
pub const FUNCTIONAL: u16 = 0xDFFF;

const TIMEOUT: Duration = Duration::from_secs(3);

/// Entity on 127.0.0.1 with ephemeral ports that does not announce itself
pub fn entity_config() -> EntityConfig {
    let mut config = EntityConfig::new("gateway", GATEWAY, "WBA00000000000001", [0x10; 6], [0x90; 6])
        .unwrap()
        .on_ephemeral_ports(IpAddr::V4(Ipv4Addr::LOCALHOST));
    config.announce_count = 0;
    config
}

pub async fn start(config: EntityConfig) -> (Arc<SimEntity>, BoundAddresses) {
    start_with(config, EntityOptions::default()).await
}

pub async fn start_with(
    config: EntityConfig,
    options: EntityOptions,
) -> (Arc<SimEntity>, BoundAddresses) {
    let entity = SimEntity::new(config, options).unwrap();
    let bound = entity.start().await.unwrap();
    (entity, bound)
}

pub struct Tester {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Tester {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            buffer: BytesMut::new(),
        }
    }

    /// Connect and register `source`, asserting the activation succeeded
    pub async fn activated(addr: SocketAddr, source: u16) -> Self {
        let mut tester = Self::connect(addr).await;
        assert_eq!(tester.activate(source).await, 0x10);
        tester
    }

    pub async fn send(&mut self, message: DoipTcpMessage) {
        let frame = DoipFrame::new(0x02, message).encode();
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn recv(&mut self) -> DoipTcpMessage {
        self.try_recv(TIMEOUT)
            .await
            .expect("no message from entity")
    }

    /// `None` on timeout or when the entity closed the connection
    pub async fn try_recv(&mut self, timeout: Duration) -> Option<DoipTcpMessage> {
        match tokio::time::timeout(timeout, read_frame(&mut self.stream, &mut self.buffer)).await {
            Ok(Ok(Some(frame))) => Some(frame.message),
            _ => None,
        }
    }

    /// True once the entity closed the connection
    pub async fn closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(
            tokio::time::timeout(TIMEOUT, self.stream.read(&mut byte)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    pub async fn activate(&mut self, source: u16) -> u8 {
        self.send(DoipTcpMessage::RoutingActivationRequest(RoutingActivationRequest {
            source_address: source,
            activation_type: 0x00,
            reserved: 0,
            oem_data: None,
        }))
        .await;
        match self.recv().await {
            DoipTcpMessage::RoutingActivationResponse(response) => response.response_code,
            other => panic!("expected routing activation response, got {other:?}"),
        }
    }

    pub async fn send_diagnostic(&mut self, source: u16, target: u16, payload: &[u8]) {
        self.send(DoipTcpMessage::DiagnosticMessage(DiagnosticMessage {
            source_address: source,
            target_address: target,
            payload: Bytes::copy_from_slice(payload),
        }))
        .await;
    }

    /// Send a request from the tester and assert the transport-level ack
    pub async fn request(&mut self, target: u16, payload: &[u8]) {
        self.send_diagnostic(TESTER, target, payload).await;
        match self.recv().await {
            DoipTcpMessage::DiagnosticMessageAck(ack) => {
                assert_eq!(ack.code, 0x00);
                assert_eq!(ack.source_address, target);
                assert_eq!(ack.target_address, TESTER);
            }
            other => panic!("expected diagnostic ack, got {other:?}"),
        }
    }

    /// Next diagnostic response as (source address, UDS payload)
    pub async fn response(&mut self) -> (u16, Vec<u8>) {
        match self.recv().await {
            DoipTcpMessage::DiagnosticMessage(message) => {
                assert_eq!(message.target_address, TESTER);
                (message.source_address, message.payload.to_vec())
            }
            other => panic!("expected diagnostic message, got {other:?}"),
        }
    }

    pub async fn response_payload(&mut self) -> Vec<u8> {
        self.response().await.1
    }
}

/// UDP socket on 127.0.0.1 for discovery requests and announcements
pub async fn udp_client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

pub async fn recv_udp(socket: &UdpSocket, timeout: Duration) -> Option<DoipUdpMessage> {
    let mut buf = [0u8; 1024];
    let (len, _) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    DoipFrame::<DoipUdpMessage>::decode(&buf[..len])
        .ok()
        .map(|frame| frame.message)
}
