//! Loading the shipped example configuration.

use std::io::Write;

use inkstream::config::{LogFormat, StoreBackend};
use inkstream::Config;

const EXAMPLE: &str = include_str!("../inkstream.example.toml");

#[test]
fn test_example_config_parses_and_validates() {
    let config = Config::parse_str(EXAMPLE).unwrap();
    config.validate().unwrap();

    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.store.key_prefix, "stream:");
    assert_eq!(config.messaging.service_name, "notifications");
    assert!(config.messaging.instance_id.is_none());
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[messaging]\nservice_name = \"billing\"\nbatch_size = 50").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.messaging.service_name, "billing");
    assert_eq!(config.messaging.batch_size, 50);
    assert_eq!(config.messaging.poll_interval_ms, 100);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/inkstream.toml")).unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_connect_with_memory_backend() {
    let config = Config::parse_str(EXAMPLE).unwrap();
    let service = inkstream::connect(&config).await.unwrap();
    assert_eq!(service.group_name(), "notifications");
    assert!(service.consumer_name().starts_with("notifications-"));
    service.health().await.unwrap();
    service.shutdown().await;
}
