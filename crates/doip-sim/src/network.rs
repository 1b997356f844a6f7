//! Registry of simulated entities and their network lifecycle

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{EntityConfig, SimConfig};
use crate::entity::{BoundAddresses, EntityOptions, SimEntity};
use crate::error::{ConfigError, NetworkError};

/// Every entity of one simulation, constructed once and passed around by
/// reference
#[derive(Debug, Default)]
pub struct SimRegistry {
    entities: Vec<Arc<SimEntity>>,
}

impl SimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every entity from `configs`; the first invalid one aborts
    pub fn from_configs(
        configs: impl IntoIterator<Item = EntityConfig>,
        options: &EntityOptions,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in configs {
            registry.add(SimEntity::new(config, options.clone())?)?;
        }
        Ok(registry)
    }

    pub fn from_config(config: &SimConfig, options: &EntityOptions) -> Result<Self, ConfigError> {
        Self::from_configs(config.entity_configs()?, options)
    }

    pub fn add(&mut self, entity: Arc<SimEntity>) -> Result<(), ConfigError> {
        if self.entity(entity.name()).is_some() {
            return Err(ConfigError::DuplicateEntity(entity.name().to_string()));
        }
        self.entities.push(entity);
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<SimEntity>> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn entities(&self) -> &[Arc<SimEntity>] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Starts and stops every entity of a registry
#[derive(Debug)]
pub struct NetworkManager {
    registry: SimRegistry,
}

impl NetworkManager {
    pub fn new(registry: SimRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SimRegistry {
        &self.registry
    }

    /// Start every entity. If one fails to bind, the ones already started
    /// are stopped again and the error is returned.
    pub async fn start_all(&self) -> Result<Vec<(String, BoundAddresses)>, NetworkError> {
        let mut started = Vec::with_capacity(self.registry.len());
        for entity in self.registry.entities() {
            match entity.start().await {
                Ok(bound) => started.push((entity.name().to_string(), bound)),
                Err(err) => {
                    warn!(entity = %entity.name(), error = %err, "Start failed, rolling back");
                    self.stop_all().await;
                    return Err(err);
                }
            }
        }
        info!(entities = started.len(), "Network started");
        Ok(started)
    }

    pub async fn stop_all(&self) {
        for entity in self.registry.entities() {
            entity.stop().await;
        }
        info!("Network stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn config(name: &str, address: u16) -> EntityConfig {
        EntityConfig::new(name, address, "WBA00000000000001", [0x10; 6], [0x90; 6])
            .unwrap()
            .on_ephemeral_ports(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn test_duplicate_entity_name() {
        let err = SimRegistry::from_configs(
            [config("gateway", 0x1010), config("gateway", 0x2010)],
            &EntityOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEntity(name) if name == "gateway"));
    }

    #[tokio::test]
    async fn test_start_and_stop_all() {
        let registry = SimRegistry::from_configs(
            [config("front", 0x1010), config("rear", 0x2010)],
            &EntityOptions::default(),
        )
        .unwrap();
        let network = NetworkManager::new(registry);

        let started = network.start_all().await.unwrap();
        assert_eq!(started.len(), 2);
        assert_ne!(started[0].1.tcp, started[1].1.tcp);

        network.stop_all().await;
        for entity in network.registry().entities() {
            assert!(!entity.is_running().await);
        }
    }

    #[tokio::test]
    async fn test_bind_failure_rolls_back() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let mut second = config("rear", 0x2010);
        second.port = taken;
        let registry =
            SimRegistry::from_configs([config("front", 0x1010), second], &EntityOptions::default())
                .unwrap();
        let network = NetworkManager::new(registry);

        assert!(matches!(
            network.start_all().await,
            Err(NetworkError::Bind { kind: "TCP", .. })
        ));
        assert!(!network.registry().entities()[0].is_running().await);
    }
}
