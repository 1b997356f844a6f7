//! doip-sim - Simulated DoIP entities
//!
//! Hosts [`SimEcu`](sim_ecu::SimEcu) instances behind ISO 13400 entities:
//! UDP discovery, TCP routing activation and diagnostic message routing to
//! logical and functional ECU addresses.
//!
//! # Example
//!
//! ```ignore
//! use doip_sim::{EntityConfig, EntityOptions, NetworkManager, SimEntity, SimRegistry};
//! use sim_ecu::{EcuConfig, RequestMatcher};
//!
//! let config = EntityConfig::new("gateway", 0x1010, "WBA00000000000001", [0x10; 6], [0x90; 6])?
//!     .with_ecu(EcuConfig::new("engine", 0x1010));
//! let entity = SimEntity::new(config, EntityOptions::default())?;
//! entity.ecus()[0].add_matcher(RequestMatcher::exact("session", [0x10, 0x01], |ctx| ctx.ack()));
//!
//! let mut registry = SimRegistry::new();
//! registry.add(entity)?;
//! NetworkManager::new(registry).start_all().await?;
//! ```
//!
//! # Modules
//!
//! - [`config`] - Entity/ECU descriptions and TOML loading
//! - [`entity`] - Entity lifecycle, sockets and hard reset
//! - [`registry`] - Target address resolution and fan-out
//! - [`network`] - Entity registry and start/stop of the whole simulation
//! - [`frame_io`] - Reading DoIP frames from a byte stream
//! - [`socket`] - Socket setup and the TLS acceptor seam

pub mod config;
mod connection;
pub mod entity;
pub mod error;
pub mod frame_io;
pub mod network;
pub mod registry;
pub mod socket;
mod udp;

pub use config::{
    AdditionalVam, EcuDefinition, EntityConfig, NodeType, ResponseAction, SimConfig,
    StaticResponse, TlsMode,
};
pub use entity::{BoundAddresses, EcuFactory, EntityOptions, SimEntity};
pub use error::{ConfigError, NetworkError};
pub use network::{NetworkManager, SimRegistry};
pub use registry::EntityRegistry;
pub use socket::{DoipStream, SecureAcceptor};
