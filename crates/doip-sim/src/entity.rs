//! Simulated DoIP entity
//!
//! An entity owns its ECUs, its address registry and the sockets it serves:
//! a plain TCP listener, an optional TLS listener and one UDP socket for
//! discovery. `start` binds everything before spawning anything, `stop`
//! aborts every task (closing all connections), and a hard reset is a stop,
//! an offline window and a fresh start on the same ports.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sim_ecu::{EcuConfig, EntityControl, SimEcu};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::{EcuDefinition, EntityConfig};
use crate::connection::{accept_loop, ConnectionTable};
use crate::error::{ConfigError, NetworkError};
use crate::registry::EntityRegistry;
use crate::socket::{bind_tcp_listener, bind_udp_socket, SecureAcceptor};
use crate::udp::{announce, serve_udp};

/// Builds the ECU for one configured definition
pub type EcuFactory = Arc<dyn Fn(EcuConfig) -> Arc<SimEcu> + Send + Sync>;

/// Injected collaborators of an entity
#[derive(Clone)]
pub struct EntityOptions {
    pub ecu_factory: EcuFactory,
    /// Required when the entity enables TLS
    pub secure_acceptor: Option<Arc<dyn SecureAcceptor>>,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            ecu_factory: Arc::new(SimEcu::new),
            secure_acceptor: None,
        }
    }
}

impl EntityOptions {
    pub fn with_ecu_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(EcuConfig) -> Arc<SimEcu> + Send + Sync + 'static,
    {
        self.ecu_factory = Arc::new(factory);
        self
    }

    pub fn with_secure_acceptor(mut self, acceptor: Arc<dyn SecureAcceptor>) -> Self {
        self.secure_acceptor = Some(acceptor);
        self
    }
}

/// Addresses an entity is currently serving on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddresses {
    pub tcp: SocketAddr,
    pub tls: Option<SocketAddr>,
    pub udp: SocketAddr,
}

/// State shared by the entity and its socket tasks
pub(crate) struct EntityState {
    pub(crate) config: EntityConfig,
    pub(crate) registry: EntityRegistry,
    pub(crate) connections: Arc<ConnectionTable>,
    /// Address -> number of overlapping resets
    resetting: Mutex<HashMap<u16, usize>>,
}

impl EntityState {
    pub(crate) fn is_resetting(&self, address: u16) -> bool {
        self.resetting.lock().contains_key(&address)
    }

    fn mark_resetting(&self, address: u16) {
        *self.resetting.lock().entry(address).or_default() += 1;
    }

    fn unmark_resetting(&self, address: u16) {
        let mut resetting = self.resetting.lock();
        if let Some(count) = resetting.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                resetting.remove(&address);
            }
        }
    }
}

#[derive(Default)]
struct Runtime {
    tasks: JoinSet<()>,
    bound: Option<BoundAddresses>,
    /// Ports from the first start, reused when restarting after a reset
    ports: Option<BoundAddresses>,
    /// Bumped by every explicit stop; a hard reset only restarts if it
    /// is unchanged
    stops: u64,
}

pub struct SimEntity {
    state: Arc<EntityState>,
    ecus: Vec<Arc<SimEcu>>,
    secure_acceptor: Option<Arc<dyn SecureAcceptor>>,
    runtime: tokio::sync::Mutex<Runtime>,
}

impl SimEntity {
    /// Validate `config`, build the ECUs and wire them back to the entity.
    /// Nothing is bound until [`SimEntity::start`].
    pub fn new(config: EntityConfig, options: EntityOptions) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        if config.tls_mode.is_enabled() && options.secure_acceptor.is_none() {
            return Err(ConfigError::MissingSecureAcceptor(config.name.clone()));
        }

        let ecus: Vec<Arc<SimEcu>> = config
            .ecus
            .iter()
            .map(|definition| build_ecu(definition, &options.ecu_factory))
            .collect();
        let registry = EntityRegistry::new(&ecus);

        let entity = Arc::new_cyclic(|me: &Weak<SimEntity>| {
            for ecu in &ecus {
                let control: Weak<dyn EntityControl> = me.clone();
                ecu.attach_entity(control);
            }
            Self {
                state: Arc::new(EntityState {
                    config,
                    registry,
                    connections: ConnectionTable::new(),
                    resetting: Mutex::new(HashMap::new()),
                }),
                ecus,
                secure_acceptor: options.secure_acceptor,
                runtime: tokio::sync::Mutex::new(Runtime::default()),
            }
        });
        Ok(entity)
    }

    pub fn name(&self) -> &str {
        &self.state.config.name
    }

    pub fn config(&self) -> &EntityConfig {
        &self.state.config
    }

    pub fn logical_address(&self) -> u16 {
        self.state.config.logical_address
    }

    pub fn ecus(&self) -> &[Arc<SimEcu>] {
        &self.ecus
    }

    pub fn ecu(&self, name: &str) -> Option<&Arc<SimEcu>> {
        self.ecus.iter().find(|ecu| ecu.name() == name)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.state.registry
    }

    /// TCP connections currently open, registered or not
    pub fn open_connections(&self) -> usize {
        self.state.connections.open_count()
    }

    pub fn is_resetting(&self, address: u16) -> bool {
        self.state.is_resetting(address)
    }

    pub async fn bound_addresses(&self) -> Option<BoundAddresses> {
        self.runtime.lock().await.bound
    }

    /// Bind all sockets, then start serving and announcing.
    ///
    /// Idempotent while running. A bind failure leaves the entity stopped.
    pub async fn start(&self) -> Result<BoundAddresses, NetworkError> {
        let mut runtime = self.runtime.lock().await;
        self.start_locked(&mut runtime)
    }

    fn start_locked(&self, runtime: &mut Runtime) -> Result<BoundAddresses, NetworkError> {
        if let Some(bound) = runtime.bound {
            return Ok(bound);
        }

        let config = &self.state.config;
        let tcp_addr = runtime
            .ports
            .map(|p| p.tcp)
            .unwrap_or_else(|| SocketAddr::new(config.local_address, config.port));
        let udp_addr = runtime
            .ports
            .map(|p| p.udp)
            .unwrap_or_else(|| SocketAddr::new(config.local_address, config.port));

        let tcp = bind_tcp_listener(tcp_addr, "TCP")?;
        let tls = match &self.secure_acceptor {
            Some(acceptor) if config.tls_mode.is_enabled() => {
                let tls_addr = runtime
                    .ports
                    .and_then(|p| p.tls)
                    .unwrap_or_else(|| SocketAddr::new(config.local_address, config.tls_port));
                Some((bind_tcp_listener(tls_addr, "TLS")?, acceptor.clone()))
            }
            _ => None,
        };
        let udp = Arc::new(bind_udp_socket(udp_addr)?);

        let bound = BoundAddresses {
            tcp: tcp.local_addr()?,
            tls: tls
                .as_ref()
                .map(|(listener, _)| listener.local_addr())
                .transpose()?,
            udp: udp.local_addr()?,
        };

        runtime
            .tasks
            .spawn(accept_loop(tcp, self.state.clone(), None));
        if let Some((listener, acceptor)) = tls {
            runtime
                .tasks
                .spawn(accept_loop(listener, self.state.clone(), Some(acceptor)));
        }
        runtime
            .tasks
            .spawn(serve_udp(udp.clone(), self.state.clone()));
        runtime.tasks.spawn(announce(udp, self.state.clone()));

        runtime.bound = Some(bound);
        runtime.ports = Some(bound);
        info!(
            entity = %config.name,
            address = format!("0x{:04X}", config.logical_address),
            tcp = %bound.tcp,
            tls = ?bound.tls,
            udp = %bound.udp,
            "Entity started"
        );
        Ok(bound)
    }

    /// Close every socket and connection. Idempotent.
    ///
    /// A hard reset in progress will not bring the entity back.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        runtime.stops += 1;
        Self::stop_locked(&mut runtime, self.name()).await;
    }

    async fn stop_locked(runtime: &mut Runtime, name: &str) {
        if runtime.bound.take().is_none() {
            return;
        }
        runtime.tasks.shutdown().await;
        info!(entity = %name, "Entity stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.bound.is_some()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<EntityState> {
        &self.state
    }
}

fn build_ecu(definition: &EcuDefinition, factory: &EcuFactory) -> Arc<SimEcu> {
    let ecu = factory(definition.config.clone());
    for response in &definition.responses {
        ecu.add_matcher(response.to_matcher());
    }
    ecu
}

#[async_trait]
impl EntityControl for SimEntity {
    async fn hard_reset(&self, duration: Duration) {
        let address = self.logical_address();
        info!(
            entity = %self.name(),
            duration_ms = duration.as_millis() as u64,
            "Hard reset: going offline"
        );
        self.state.mark_resetting(address);
        let stops = {
            let mut runtime = self.runtime.lock().await;
            Self::stop_locked(&mut runtime, self.name()).await;
            runtime.stops
        };
        tokio::time::sleep(duration).await;
        self.state.unmark_resetting(address);

        let mut runtime = self.runtime.lock().await;
        if runtime.stops != stops {
            info!(entity = %self.name(), "Hard reset: stopped meanwhile, staying offline");
            return;
        }
        match self.start_locked(&mut runtime) {
            Ok(_) => info!(entity = %self.name(), "Hard reset: back online"),
            Err(err) => error!(entity = %self.name(), error = %err, "Hard reset: restart failed"),
        }
    }

    async fn hard_reset_ecu(&self, address: u16, duration: Duration) {
        info!(
            entity = %self.name(),
            ecu = format!("0x{:04X}", address),
            duration_ms = duration.as_millis() as u64,
            "ECU reset: unreachable"
        );
        self.state.mark_resetting(address);
        tokio::time::sleep(duration).await;
        self.state.unmark_resetting(address);
        info!(entity = %self.name(), ecu = format!("0x{:04X}", address), "ECU reset: reachable");
    }
}

impl std::fmt::Debug for SimEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEntity")
            .field("name", &self.state.config.name)
            .field(
                "logical_address",
                &format_args!("0x{:04X}", self.state.config.logical_address),
            )
            .field("ecus", &self.ecus.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use crate::config::TlsMode;

    fn config() -> EntityConfig {
        EntityConfig::new("gateway", 0x1010, "WBA00000000000001", [0x10; 6], [0x90; 6])
            .unwrap()
            .on_ephemeral_ports(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_ecu(EcuConfig::new("gateway", 0x1010))
            .with_ecu(EcuConfig::new("engine", 0x1011))
    }

    #[test]
    fn test_tls_requires_acceptor() {
        let mut config = config();
        config.tls_mode = TlsMode::Mandatory;
        let err = SimEntity::new(config, EntityOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecureAcceptor(name) if name == "gateway"));
    }

    #[test]
    fn test_factory_builds_every_ecu() {
        let options = EntityOptions::default().with_ecu_factory(|config| {
            let ecu = SimEcu::new(config);
            ecu.store().set("built-by", String::from("factory"));
            ecu
        });
        let entity = SimEntity::new(config(), options).unwrap();

        assert_eq!(entity.ecus().len(), 2);
        for ecu in entity.ecus() {
            assert_eq!(ecu.store().get::<String>("built-by").as_deref(), Some("factory"));
        }
        assert!(entity.ecu("engine").is_some());
        assert!(entity.registry().exists_target_address(0x1011));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_restart_reuses_ports() {
        let entity = SimEntity::new(config(), EntityOptions::default()).unwrap();

        let first = entity.start().await.unwrap();
        assert_eq!(entity.start().await.unwrap(), first);
        assert!(first.tls.is_none());

        entity.stop().await;
        assert!(!entity.is_running().await);
        assert_eq!(entity.bound_addresses().await, None);

        let second = entity.start().await.unwrap();
        assert_eq!(second, first);
        entity.stop().await;
    }

    #[tokio::test]
    async fn test_ecu_reset_window() {
        let entity = SimEntity::new(config(), EntityOptions::default()).unwrap();

        let control = entity.clone();
        let reset = tokio::spawn(async move {
            control.hard_reset_ecu(0x1011, Duration::from_millis(200)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(entity.is_resetting(0x1011));
        assert!(!entity.is_resetting(0x1010));

        reset.await.unwrap();
        assert!(!entity.is_resetting(0x1011));
    }
}
