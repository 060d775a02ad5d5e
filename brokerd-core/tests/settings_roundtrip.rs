//! End-to-end properties of the configuration pipeline: deterministic
//! defaulting and round-trip stability of validated settings.

use brokerd_core::log::MemoryLogSink;
use brokerd_core::settings::{LogLevel, UidConfig};
use brokerd_core::source::FileConfigSource;
use brokerd_core::{BrokerConfig, ParseResult};

use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

#[test]
fn empty_document_and_all_defaults_round_trip() {
    let log = MemoryLogSink::new();
    let mut config = BrokerConfig::new();
    assert_eq!(config.read_str("{}", &log), ParseResult::Ok);
    let defaults = config.settings.clone();

    let document = defaults.to_document().to_string();
    assert_eq!(config.read_str(&document, &log), ParseResult::Ok);
    assert_eq!(config.settings, defaults);
}

#[test]
fn validated_documents_are_round_trip_stable() {
    let input = r#"{
        "cid": "1ef44b69-2185-4e3a-945f-a5a264c405e8",
        "uid": { "type": "static", "manufacturer_id": 16000, "device_id": 3333333 },
        "dns_sd": {
            "service_instance_name": "Front of House Broker",
            "manufacturer": "Example Lighting",
            "model": "Broker Mk II"
        },
        "scope": "front-of-house",
        "listen_port": 8888,
        "listen_interfaces": ["eth0", "eth1"],
        "log_level": "notice",
        "max_connections": 20000,
        "max_controllers": 1000,
        "max_controller_messages": 500,
        "max_devices": 20000,
        "max_device_messages": 500,
        "max_reject_connections": 1000,
        "enable_broker": true
    }"#;

    let log = MemoryLogSink::new();
    let mut config = BrokerConfig::new();
    assert_eq!(config.read_str(input, &log), ParseResult::Ok);
    let first_pass = config.settings.clone();

    assert_eq!(first_pass.scope, "front-of-house");
    assert_eq!(first_pass.listen_port, 8888);
    assert_eq!(first_pass.log_level, LogLevel::Notice);
    assert_eq!(
        first_pass.uid,
        UidConfig::Static {
            manufacturer_id: 16000,
            device_id: 3333333
        }
    );

    let document = first_pass.to_document().to_string();
    assert_eq!(config.read_str(&document, &log), ParseResult::Ok);
    assert_eq!(config.settings, first_pass);
}

#[test]
fn partially_specified_document_leaves_other_fields_at_defaults() {
    let log = MemoryLogSink::new();
    let mut config = BrokerConfig::new();
    assert_eq!(
        config.read_str(r#"{ "max_connections": 20000, "scope": "default" }"#, &log),
        ParseResult::Ok
    );

    assert_eq!(config.settings.max_connections, 20000);
    assert_eq!(config.settings.scope, "default");
    assert_eq!(config.settings.max_controllers, 0);
    assert_eq!(config.settings.max_controller_messages, 500);
    assert_eq!(config.settings.max_devices, 0);
    assert_eq!(config.settings.max_device_messages, 500);
    assert_eq!(config.settings.max_reject_connections, 1000);
    assert_eq!(config.settings.listen_port, 0);
    assert_eq!(config.settings.log_level, LogLevel::Info);
    assert!(config.settings.enable_broker);
    assert!(log.entries().is_empty());
}

#[test]
fn file_source_feeds_the_validator() {
    let dir = TempDir::new().expect("test setup should succeed");
    let path = dir.path().join("broker.conf");
    fs::write(&path, r#"{ "scope": "studio-b" }"#).expect("test setup should succeed");

    let log = MemoryLogSink::new();
    let mut config = BrokerConfig::new();
    let source = FileConfigSource::new(&path);
    assert_eq!(config.load(&source, &log), ParseResult::Ok);
    assert_eq!(config.settings.scope, "studio-b");
}

#[test]
fn unreadable_file_source_substitutes_defaults() {
    let dir = TempDir::new().expect("test setup should succeed");
    let path = dir.path().join("missing.conf");

    let log = MemoryLogSink::new();
    let mut config = BrokerConfig::new();
    let source = FileConfigSource::new(&path);
    assert_eq!(config.load(&source, &log), ParseResult::FileOpenErr);
    assert_eq!(config.settings.scope, "default");
    assert!(log
        .messages()
        .iter()
        .any(|message| message.contains("default settings")));
}

#[test]
fn repeated_reloads_keep_a_stable_default_cid() {
    let log = MemoryLogSink::new();
    let mut config = BrokerConfig::new();

    assert_eq!(config.read_str("{}", &log), ParseResult::Ok);
    let first_cid = config.settings.cid;

    assert_eq!(config.read_str("{}", &log), ParseResult::Ok);
    assert_eq!(config.settings.cid, first_cid);
    assert_eq!(config.default_cid(), first_cid);
}
