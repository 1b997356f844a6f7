//! Entities built from a TOML file

mod common;

use std::io::Write;

use common::*;
use doip_sim::{ConfigError, EntityOptions, NetworkManager, SimConfig, SimRegistry, TlsMode};
use pretty_assertions::assert_eq;

const CONFIG: &str = r#"
[[entities]]
name = "gateway"
logical_address = 0x1010
vin = "WBA00000000000001"
eid = "10 10 10 10 10 10"
gid = "909090909090"
local_address = "127.0.0.1"
port = 0
tls_port = 0
announce_count = 0

[[entities.ecus]]
name = "gateway"
physical_address = 0x1010

[[entities.ecus.responses]]
request = "10 03"
ack = true

[[entities.ecus]]
name = "engine"
physical_address = 0x1011
pending_interval_ms = 100

[[entities.ecus.responses]]
name = "vin"
request = "22 F1 90"
response = "62 F1 90 57 42 41"

[[entities.ecus.responses]]
name = "routine"
regex = "3101FF.."
response = "71 01 FF 00"
pending_ms = 350

[[entities.ecus.responses]]
request = "27 01"
nrc = 0x22
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

async fn start_from(content: &str) -> NetworkManager {
    let file = write_config(content);
    let config = SimConfig::load(file.path()).unwrap();
    let registry = SimRegistry::from_config(&config, &EntityOptions::default()).unwrap();
    let network = NetworkManager::new(registry);
    network.start_all().await.unwrap();
    network
}

#[tokio::test]
async fn test_configured_responses() {
    let network = start_from(CONFIG).await;
    let entity = network.registry().entity("gateway").unwrap();
    let bound = entity.bound_addresses().await.unwrap();
    assert_eq!(entity.ecus().len(), 2);

    let mut tester = Tester::activated(bound.tcp, TESTER).await;

    tester.request(GATEWAY, &[0x10, 0x03]).await;
    assert_eq!(tester.response().await, (GATEWAY, vec![0x50, 0x03]));

    tester.request(ENGINE, &[0x22, 0xF1, 0x90]).await;
    assert_eq!(
        tester.response().await,
        (ENGINE, vec![0x62, 0xF1, 0x90, 0x57, 0x42, 0x41])
    );

    tester.request(ENGINE, &[0x27, 0x01]).await;
    assert_eq!(tester.response_payload().await, vec![0x7F, 0x27, 0x22]);

    network.stop_all().await;
}

#[tokio::test]
async fn test_configured_pending_response() {
    let network = start_from(CONFIG).await;
    let bound = network.registry().entities()[0]
        .bound_addresses()
        .await
        .unwrap();

    let mut tester = Tester::activated(bound.tcp, TESTER).await;
    tester.request(ENGINE, &[0x31, 0x01, 0xFF, 0x02]).await;

    let mut pending = 0;
    let last = loop {
        let payload = tester.response_payload().await;
        if payload == [0x7F, 0x31, 0x78] {
            pending += 1;
        } else {
            break payload;
        }
    };
    assert!(pending >= 1);
    assert_eq!(last, vec![0x71, 0x01, 0xFF, 0x00]);

    network.stop_all().await;
}

#[test]
fn test_duplicate_physical_address() {
    let content = CONFIG.replace("physical_address = 0x1011", "physical_address = 0x1010");
    let config = SimConfig::from_toml(&content).unwrap();
    assert!(matches!(
        config.entity_configs(),
        Err(ConfigError::DuplicateAddress { address: 0x1010, .. })
    ));
}

#[test]
fn test_mandatory_tls_needs_acceptor() {
    let content = CONFIG.replace("announce_count = 0", "announce_count = 0\ntls_mode = \"mandatory\"");
    let config = SimConfig::from_toml(&content).unwrap();
    assert_eq!(config.entity_configs().unwrap()[0].tls_mode, TlsMode::Mandatory);
    assert!(matches!(
        SimRegistry::from_config(&config, &EntityOptions::default()),
        Err(ConfigError::MissingSecureAcceptor(name)) if name == "gateway"
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        SimConfig::load("/nonexistent/doip-sim.toml"),
        Err(ConfigError::Read { .. })
    ));
}
