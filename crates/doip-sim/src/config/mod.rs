//! Entity and ECU configuration
//!
//! Programmatic setups build [`EntityConfig`] directly; deployments load a
//! [`SimConfig`] from TOML and convert it.

pub mod entity;
pub mod file;
pub mod response;

pub use entity::{AdditionalVam, EcuDefinition, EntityConfig, NodeType, TlsMode};
pub use file::SimConfig;
pub use response::{ResponseAction, StaticResponse};
