//! Address-to-ECU routing for one entity

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use sim_ecu::{ResponseSink, SimEcu};
use tracing::debug;

/// Logical and functional address maps, built once and read-only afterwards
#[derive(Default)]
pub struct EntityRegistry {
    logical: HashMap<u16, Arc<SimEcu>>,
    functional: HashMap<u16, Vec<Arc<SimEcu>>>,
}

impl EntityRegistry {
    /// ECUs keep their declaration order inside each functional group
    pub fn new(ecus: &[Arc<SimEcu>]) -> Self {
        let mut registry = Self::default();
        for ecu in ecus {
            registry.logical.insert(ecu.physical_address(), ecu.clone());
            if let Some(functional) = ecu.functional_address() {
                registry
                    .functional
                    .entry(functional)
                    .or_default()
                    .push(ecu.clone());
            }
        }
        registry
    }

    pub fn exists_target_address(&self, address: u16) -> bool {
        self.logical.contains_key(&address) || self.functional.contains_key(&address)
    }

    /// Logical match first and exclusively, then the functional group
    pub fn targets(&self, address: u16) -> &[Arc<SimEcu>] {
        if let Some(ecu) = self.logical.get(&address) {
            return std::slice::from_ref(ecu);
        }
        self.functional
            .get(&address)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Hand `payload` to every target of `address`, each with its own sink.
    /// Targets for which `make_sink` returns `None` are skipped.
    ///
    /// Functional fan-out runs the ECUs concurrently; the call returns once
    /// all of them finished (pending loops included).
    pub async fn dispatch<S, F>(&self, address: u16, payload: &[u8], make_sink: F)
    where
        S: ResponseSink,
        F: Fn(&SimEcu) -> Option<S>,
    {
        let deliveries: Vec<_> = self
            .targets(address)
            .iter()
            .filter_map(|ecu| make_sink(ecu).map(|sink| (ecu, sink)))
            .collect();
        debug!(
            target_address = format!("0x{:04X}", address),
            ecus = deliveries.len(),
            "Dispatching diagnostic request"
        );
        join_all(
            deliveries
                .iter()
                .map(|(ecu, sink)| ecu.on_incoming_request(payload, sink)),
        )
        .await;
    }

    pub fn ecu(&self, address: u16) -> Option<&Arc<SimEcu>> {
        self.logical.get(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use sim_ecu::testing::RecordingSink;
    use sim_ecu::{EcuConfig, RequestMatcher};

    fn ecu(name: &str, address: u16, functional: Option<u16>) -> Arc<SimEcu> {
        let mut config = EcuConfig::new(name, address);
        config.functional_address = functional;
        let ecu = SimEcu::new(config);
        ecu.add_matcher(RequestMatcher::exact("tester-present", [0x3E, 0x00], |ctx| ctx.ack()));
        ecu
    }

    fn names(ecus: &[Arc<SimEcu>]) -> Vec<&str> {
        ecus.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_logical_lookup_is_exclusive() {
        let ecus = vec![
            ecu("gateway", 0x1010, Some(0xDFFF)),
            ecu("engine", 0x1011, Some(0xDFFF)),
        ];
        let registry = EntityRegistry::new(&ecus);

        assert_eq!(names(registry.targets(0x1011)), vec!["engine"]);
        assert_eq!(names(registry.targets(0xDFFF)), vec!["gateway", "engine"]);
        assert!(registry.targets(0x2000).is_empty());
        assert!(registry.exists_target_address(0xDFFF));
        assert!(!registry.exists_target_address(0x2000));
    }

    #[tokio::test]
    async fn test_functional_fan_out() {
        let ecus = vec![
            ecu("gateway", 0x1010, Some(0xDFFF)),
            ecu("engine", 0x1011, Some(0xDFFF)),
        ];
        let registry = EntityRegistry::new(&ecus);
        let sinks: Vec<Arc<RecordingSink>> = (0..2).map(|_| Arc::new(RecordingSink::new())).collect();

        registry
            .dispatch(0xDFFF, &[0x3E, 0x00], |ecu| {
                let index = if ecu.physical_address() == 0x1010 { 0 } else { 1 };
                Some(sinks[index].clone())
            })
            .await;

        for sink in &sinks {
            assert_eq!(
                sink.wait_for(1, Duration::from_secs(1)).await,
                vec![vec![0x7E, 0x00]]
            );
        }
    }

    #[tokio::test]
    async fn test_skipped_targets_get_nothing() {
        let ecus = vec![
            ecu("gateway", 0x1010, Some(0xDFFF)),
            ecu("engine", 0x1011, Some(0xDFFF)),
        ];
        let registry = EntityRegistry::new(&ecus);
        let sink = Arc::new(RecordingSink::new());

        registry
            .dispatch(0xDFFF, &[0x3E, 0x00], |ecu| {
                (ecu.name() == "engine").then(|| sink.clone())
            })
            .await;

        assert_eq!(sink.sent(), vec![vec![0x7E, 0x00]]);
    }
}
