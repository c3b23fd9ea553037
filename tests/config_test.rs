//! Session configuration export/import and compatibility checks

use tickwire::protocol::codec;
use tickwire::protocol::fingerprint::{fingerprint, fingerprint_preimage};
use tickwire::protocol::{
    AttributeMessageMode, ChannelKind, ConfigError, MessageTypeRegistry, SessionConfiguration,
    TransportKind,
};

fn game_config() -> SessionConfiguration {
    let mut config = SessionConfiguration::default()
        .with_channel("Reliable", ChannelKind::Reliable)
        .with_channel("Fast", ChannelKind::UnreliableSequenced)
        .with_message_type("Spawn", true);
    config.enable_encryption = false;
    config.allow_passthrough_messages = true;
    config
}

#[test]
fn test_two_channel_config_roundtrip() {
    let config = game_config();

    let bytes = codec::encode(&config).unwrap();
    let decoded = codec::decode(&bytes).unwrap();

    assert_eq!(decoded.channels.len(), 2);
    assert_eq!(decoded.channels[0].name, "Reliable");
    assert_eq!(decoded.channels[0].kind, ChannelKind::Reliable);
    assert_eq!(decoded.channels[1].name, "Fast");
    assert_eq!(decoded.channels[1].kind, ChannelKind::UnreliableSequenced);
    assert_eq!(decoded.message_types[0].name, "Spawn");
    assert!(decoded.message_types[0].passthrough);
    assert!(!decoded.enable_encryption);
    assert_eq!(decoded, config);
}

#[test]
fn test_fingerprint_covers_passthrough_not_encryption() {
    let config = game_config();
    let preimage = fingerprint_preimage(&config).unwrap();
    assert!(preimage.windows(5).any(|window| window == b"Spawn"));

    // encrypted bits are ignored while encryption is disabled
    let mut encrypted = config.clone();
    encrypted.channels[0].encrypted = true;
    assert_eq!(fingerprint(&encrypted).unwrap(), fingerprint(&config).unwrap());

    let mut no_passthrough = config.clone();
    no_passthrough.message_types[0].passthrough = false;
    assert_ne!(fingerprint(&no_passthrough).unwrap(), fingerprint(&config).unwrap());
}

#[test]
fn test_base64_export_import_compatible() {
    let local = game_config();
    let text = local.to_base64().unwrap();

    let remote = SessionConfiguration::from_base64(&text).unwrap();
    let remote_hash = remote.config_hash(false).unwrap();
    assert!(local.compare_config(remote_hash.as_bytes()));
}

#[test]
fn test_incompatible_peers_detected() {
    let local = game_config();
    let remote = game_config().with_channel("Voice", ChannelKind::Unreliable);

    let remote_hash = remote.config_hash(false).unwrap();
    assert!(!local.compare_config(remote_hash.as_bytes()));
    assert!(!local.compare_config(&remote_hash.as_bytes()[..10]));
}

#[test]
fn test_non_fingerprinted_fields_stay_compatible() {
    let local = game_config();
    let mut remote = game_config();
    remote.connect_port = 9000;
    remote.max_connections = 8;
    remote.transport = TransportKind::Memory;
    remote.enable_time_resync = true;

    let remote_hash = remote.config_hash(false).unwrap();
    assert!(local.compare_config(remote_hash.as_bytes()));
}

#[test]
fn test_cached_hash_needs_clearing() {
    let mut config = game_config();
    let first = config.config_hash(true).unwrap();

    config.attribute_message_mode = AttributeMessageMode::FourByte;
    assert_eq!(config.config_hash(true).unwrap(), first);
    assert_ne!(config.config_hash(false).unwrap(), first);

    config.clear_config_hash();
    assert_ne!(config.config_hash(true).unwrap(), first);
}

#[test]
fn test_json_import_fills_defaults() {
    let config = SessionConfiguration::from_json(
        r#"{
            "protocol_version": 3,
            "channels": [{ "name": "Reliable", "kind": "Reliable" }],
            "connect_port": 9000
        }"#,
    )
    .unwrap();

    assert_eq!(config.protocol_version, 3);
    assert_eq!(config.channels[0].kind, ChannelKind::Reliable);
    assert_eq!(config.connect_port, 9000);
    assert_eq!(config.max_connections, SessionConfiguration::default().max_connections);

    let json = config.to_json().unwrap();
    assert_eq!(SessionConfiguration::from_json(&json).unwrap(), config);
}

#[test]
fn test_import_rejects_garbage() {
    assert!(matches!(
        SessionConfiguration::from_base64("not base64!"),
        Err(ConfigError::InvalidBase64(_))
    ));
    assert!(SessionConfiguration::from_base64("AAAA").is_err_and(|e| e.is_malformed()));
    assert!(matches!(
        SessionConfiguration::from_json("{"),
        Err(ConfigError::InvalidJson(_))
    ));
}

#[test]
fn test_message_type_ids_follow_config_order() {
    let config = game_config().with_message_type("Chat", false);
    let registry = MessageTypeRegistry::from_config(&config).unwrap();

    let spawn = registry.id("Spawn").unwrap();
    let chat = registry.id("Chat").unwrap();
    assert_eq!(chat, spawn + 1);
    assert!(registry.is_passthrough(spawn));
    assert!(!registry.is_passthrough(chat));
}
