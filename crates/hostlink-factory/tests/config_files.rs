use std::io::Write;

use hostlink_factory::{FactoryError, ProgramConfig, TransportFactory, TransportKind};
use hostlink_transport::{ChannelRegistry, ConnectionState, Transport};

fn write_config(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
    file.write_all(json.as_bytes())
        .expect("config should be written");
    file
}

#[tokio::test]
async fn test_config_file_builds_connectable_in_memory_transport() {
    let file = write_config(
        r#"{
            "process_name": "simulator",
            "program_path": "/opt/sim/bin/sim",
            "transport_type": "InMemory",
            "channel_id": "sim-bus",
            "in_memory": { "queue_capacity": 16, "receive_timeout_ms": 1000 }
        }"#,
    );

    let config = ProgramConfig::from_path(file.path()).unwrap();
    assert_eq!(config.validate().unwrap(), TransportKind::InMemory);
    assert_eq!(config.in_memory.queue_capacity, 16);

    let registry = ChannelRegistry::new();
    let factory = TransportFactory::with_defaults(registry.clone());
    let transport = factory.create(&config).unwrap();

    assert!(transport.connect().await.unwrap());
    assert_eq!(transport.state(), ConnectionState::Open);
    assert!(registry.contains("sim-bus"));

    assert!(transport.send(b"hello").await.unwrap());
    assert_eq!(transport.receive().await.unwrap().unwrap().as_ref(), b"hello");

    transport.dispose().await;
    assert!(!registry.contains("sim-bus"));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");

    match ProgramConfig::from_path(&missing) {
        Err(FactoryError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn test_malformed_file_is_a_json_error() {
    let file = write_config("{ \"transport_type\": ");
    assert!(matches!(
        ProgramConfig::from_path(file.path()),
        Err(FactoryError::Json(_))
    ));
}

#[tokio::test]
async fn test_invalid_settings_fail_creation() {
    let file = write_config(r#"{"transport_type": "udp", "port": 9000, "udp": {"max_packet_size": 8}}"#);
    let config = ProgramConfig::from_path(file.path()).unwrap();

    let factory = TransportFactory::with_defaults(ChannelRegistry::new());
    assert!(matches!(
        factory.create(&config),
        Err(FactoryError::Settings {
            transport: "UDP",
            ..
        })
    ));
}
