//! TCP data connections
//!
//! Each accepted socket gets one task running a sequential read loop and one
//! writer task draining an outgoing frame queue. Every diagnostic message is
//! handed to its own task, so several requests on one connection can be in
//! flight at once; the target ECU's busy gate serializes them.
//!
//! Connection state:
//!
//! ```text
//! Unregistered ──routing activation OK──> Registered(source) ──> Closed
//!       └──────────── EOF / error / header nack ──────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use doip_wire::codes::{activation_code, activation_type, diagnostic_nack, DIAGNOSTIC_ACK};
use doip_wire::{
    DiagnosticMessage, DiagnosticMessageAck, DoipFrame, DoipTcpMessage, RoutingActivationRequest,
    RoutingActivationResponse,
};
use parking_lot::Mutex;
use sim_ecu::{ResponseSink, SinkError};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::TlsMode;
use crate::entity::EntityState;
use crate::frame_io::{read_frame, FrameError};
use crate::socket::{DoipStream, SecureAcceptor};

// =============================================================================
// Active-connection set
// =============================================================================

#[derive(Default)]
struct Slots {
    next_id: u64,
    /// Connection id -> registered tester address
    registered: HashMap<u64, Option<u16>>,
}

/// Open connections of one entity and the tester address each one registered
#[derive(Default)]
pub struct ConnectionTable {
    slots: Mutex<Slots>,
}

/// Membership of one connection; leaving the table on drop
pub struct ConnectionSlot {
    table: Arc<ConnectionTable>,
    id: u64,
}

impl ConnectionSlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.table.slots.lock().registered.remove(&self.id);
    }
}

impl ConnectionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(self: &Arc<Self>) -> ConnectionSlot {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.registered.insert(id, None);
        ConnectionSlot {
            table: self.clone(),
            id,
        }
    }

    /// Bind `source` to connection `id` and return the routing activation
    /// response code. Check and registration happen under one lock.
    pub fn activate(&self, id: u64, source: u16, max_connections: u8) -> u8 {
        let mut slots = self.slots.lock();

        match slots.registered.get(&id) {
            None => return activation_code::UNKNOWN_SOURCE_ADDRESS,
            Some(Some(current)) if *current == source => return activation_code::OK,
            Some(Some(_)) => return activation_code::DIFFERENT_SOURCE_ADDRESS,
            Some(None) => {}
        }

        let active_elsewhere = slots
            .registered
            .iter()
            .any(|(other, address)| *other != id && *address == Some(source));
        if active_elsewhere {
            return activation_code::SOURCE_ADDRESS_ALREADY_ACTIVE;
        }

        let registered = slots.registered.values().filter(|a| a.is_some()).count();
        if registered >= max_connections as usize {
            return activation_code::TCP_DATA_SOCKETS_EXHAUSTED;
        }

        slots.registered.insert(id, Some(source));
        activation_code::OK
    }

    pub fn registered_address(&self, id: u64) -> Option<u16> {
        self.slots.lock().registered.get(&id).copied().flatten()
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().registered.len()
    }

    pub fn registered_count(&self) -> usize {
        self.slots
            .lock()
            .registered
            .values()
            .filter(|a| a.is_some())
            .count()
    }
}

// =============================================================================
// Accept loop
// =============================================================================

/// Accept connections until the task is aborted. Aborting drops every
/// connection task spawned from here, closing their sockets.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    state: Arc<EntityState>,
    acceptor: Option<Arc<dyn SecureAcceptor>>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, error = %err, "Failed to set TCP_NODELAY");
                    }
                    let state = state.clone();
                    let acceptor = acceptor.clone();
                    connections.spawn(async move {
                        let secure = acceptor.is_some();
                        let stream: Box<dyn DoipStream> = match acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => stream,
                                Err(err) => {
                                    warn!(%peer, error = %err, "Secure handshake failed");
                                    return;
                                }
                            },
                            None => Box::new(stream),
                        };
                        serve_connection(state, stream, peer, secure).await;
                    });
                }
                Err(err) => {
                    warn!(error = %err, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

enum WriterCommand {
    Frame(Bytes),
    /// Flush and close the write side
    Shutdown,
}

struct Connection {
    id: u64,
    peer: SocketAddr,
    secure: bool,
    state: Arc<EntityState>,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

async fn serve_connection(
    state: Arc<EntityState>,
    stream: Box<dyn DoipStream>,
    peer: SocketAddr,
    secure: bool,
) {
    let slot = state.connections.open();
    info!(entity = %state.config.name, %peer, secure, "Connection accepted");

    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut writer_task = JoinSet::new();
    writer_task.spawn(write_loop(writer, rx, peer));

    let connection = Arc::new(Connection {
        id: slot.id(),
        peer,
        secure,
        state,
        tx,
    });

    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        match read_frame(&mut reader, &mut buffer).await {
            Ok(Some(frame)) => connection.on_frame(frame),
            Ok(None) => {
                debug!(%peer, "Connection closed by tester");
                break;
            }
            Err(FrameError::Decode(err)) => {
                warn!(%peer, error = %err, "Invalid frame, closing connection");
                connection.send(DoipTcpMessage::HeaderNack {
                    code: err.header_nack_code(),
                });
                connection.shutdown();
                // Let the nack reach the tester before the socket closes
                let _ = writer_task.join_next().await;
                break;
            }
            Err(FrameError::Io(err)) => {
                debug!(%peer, error = %err, "Connection read failed");
                break;
            }
        }
    }

    drop(slot);
    info!(entity = %connection.state.config.name, %peer, "Connection closed");
}

async fn write_loop(
    mut writer: WriteHalf<Box<dyn DoipStream>>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    peer: SocketAddr,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame(bytes) => {
                if let Err(err) = writer.write_all(&bytes).await {
                    debug!(%peer, error = %err, "Write failed");
                    break;
                }
            }
            WriterCommand::Shutdown => {
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
}

impl Connection {
    fn send(&self, message: DoipTcpMessage) -> bool {
        let frame = DoipFrame::new(self.state.config.protocol_version, message);
        self.tx.send(WriterCommand::Frame(frame.encode())).is_ok()
    }

    fn shutdown(&self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
    }

    fn on_frame(self: &Arc<Self>, frame: DoipFrame<DoipTcpMessage>) {
        match frame.message {
            DoipTcpMessage::RoutingActivationRequest(request) => {
                self.on_routing_activation(request)
            }
            DoipTcpMessage::AliveCheckRequest => {
                trace!(peer = %self.peer, "Alive check");
                self.send(DoipTcpMessage::AliveCheckResponse {
                    source_address: self.state.config.logical_address,
                });
            }
            DoipTcpMessage::DiagnosticMessage(message) => self.on_diagnostic_message(message),
            DoipTcpMessage::AliveCheckResponse { .. }
            | DoipTcpMessage::DiagnosticMessageAck(_)
            | DoipTcpMessage::DiagnosticMessageNack(_) => {
                trace!(peer = %self.peer, "Ignoring tester acknowledgement");
            }
            other => {
                debug!(peer = %self.peer, message = ?other, "Ignoring unexpected message");
            }
        }
    }

    fn on_routing_activation(&self, request: RoutingActivationRequest) {
        let config = &self.state.config;
        let code = if !matches!(
            request.activation_type,
            activation_type::DEFAULT | activation_type::WWH_OBD | activation_type::CENTRAL_SECURITY
        ) {
            activation_code::UNSUPPORTED_ACTIVATION_TYPE
        } else if config.tls_mode == TlsMode::Mandatory && !self.secure {
            activation_code::REQUIRES_TLS
        } else {
            self.state
                .connections
                .activate(self.id, request.source_address, config.max_connections)
        };

        if code == activation_code::OK {
            info!(
                peer = %self.peer,
                tester = format!("0x{:04X}", request.source_address),
                "Routing activated"
            );
        } else {
            warn!(
                peer = %self.peer,
                tester = format!("0x{:04X}", request.source_address),
                code = format!("0x{:02X}", code),
                "Routing activation rejected"
            );
        }

        self.send(DoipTcpMessage::RoutingActivationResponse(
            RoutingActivationResponse {
                tester_address: request.source_address,
                entity_address: config.logical_address,
                response_code: code,
                reserved: 0,
                oem_data: None,
            },
        ));
    }

    fn on_diagnostic_message(self: &Arc<Self>, message: DiagnosticMessage) {
        let acknowledge = |code: u8| DiagnosticMessageAck {
            source_address: message.target_address,
            target_address: message.source_address,
            code,
            previous_message: Bytes::new(),
        };
        let reject = |code: u8, reason: &str| {
            debug!(
                peer = %self.peer,
                source = format!("0x{:04X}", message.source_address),
                target = format!("0x{:04X}", message.target_address),
                reason,
                "Diagnostic message rejected"
            );
            self.send(DoipTcpMessage::DiagnosticMessageNack(acknowledge(code)));
        };

        let state = &self.state;
        if state.connections.registered_address(self.id) != Some(message.source_address) {
            return reject(diagnostic_nack::INVALID_SOURCE_ADDRESS, "source not registered");
        }
        if message.payload.len() > state.config.max_payload_size as usize {
            return reject(diagnostic_nack::MESSAGE_TOO_LARGE, "payload too large");
        }
        if !state.registry.exists_target_address(message.target_address) {
            return reject(diagnostic_nack::UNKNOWN_TARGET_ADDRESS, "unknown target");
        }

        self.send(DoipTcpMessage::DiagnosticMessageAck(acknowledge(DIAGNOSTIC_ACK)));

        if state.is_resetting(message.target_address) {
            debug!(
                target = format!("0x{:04X}", message.target_address),
                "Target is resetting, dropping request"
            );
            return;
        }

        let connection = self.clone();
        tokio::spawn(async move {
            let tester = message.source_address;
            connection
                .state
                .registry
                .dispatch(message.target_address, &message.payload, |ecu| {
                    if connection.state.is_resetting(ecu.physical_address()) {
                        return None;
                    }
                    Some(DiagnosticSink {
                        connection: connection.clone(),
                        ecu_address: ecu.physical_address(),
                        tester_address: tester,
                    })
                })
                .await;
        });
    }
}

/// Wraps ECU responses into diagnostic messages back to the tester
struct DiagnosticSink {
    connection: Arc<Connection>,
    ecu_address: u16,
    tester_address: u16,
}

#[async_trait]
impl ResponseSink for DiagnosticSink {
    async fn send(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        let message = DoipTcpMessage::DiagnosticMessage(DiagnosticMessage {
            source_address: self.ecu_address,
            target_address: self.tester_address,
            payload: Bytes::from(payload),
        });
        if self.connection.send(message) {
            Ok(())
        } else {
            Err(SinkError::Closed)
        }
    }
}
