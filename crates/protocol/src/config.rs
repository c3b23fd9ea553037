//! Session network configuration
//!
//! [`SessionConfiguration`] is an explicitly owned value: callers build it,
//! hand it to the transport layer by reference and keep it alive for as long
//! as the session runs. It can be exported to and imported from
//! - the canonical binary form ([`crate::codec`]), optionally base64 wrapped
//!   for copy/paste transport;
//! - JSON, for the external configuration loader.
//!
//! # Example
//!
//! ```
//! use tickwire_protocol::channel::ChannelKind;
//! use tickwire_protocol::config::SessionConfiguration;
//!
//! let config = SessionConfiguration::default()
//!     .with_channel("Reliable", ChannelKind::Reliable)
//!     .with_channel("Fast", ChannelKind::UnreliableSequenced);
//!
//! let text = config.to_base64().unwrap();
//! let imported = SessionConfiguration::from_base64(&text).unwrap();
//! assert_eq!(config, imported);
//! ```

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, ChannelSpec, MessageTypeSpec, PrefabSpec};
use crate::codec;
use crate::error::{ConfigError, ConfigResult as Result};
use crate::fingerprint::{self, Fingerprint};

/// Backend family in use (5-bit wire field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransportKind {
    #[default]
    Udp = 0,
    Relay = 1,
    Memory = 2,
    Custom = 3,
}

impl TryFrom<u8> for TransportKind {
    type Error = ConfigError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(TransportKind::Udp),
            1 => Ok(TransportKind::Relay),
            2 => Ok(TransportKind::Memory),
            3 => Ok(TransportKind::Custom),
            _ => Err(ConfigError::InvalidEnum {
                field: "transport",
                value,
            }),
        }
    }
}

/// Width of attribute message identifiers (3-bit wire field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttributeMessageMode {
    TwoByte = 0,
    FourByte = 1,
    EightByte = 2,
    #[default]
    Disabled = 3,
}

impl TryFrom<u8> for AttributeMessageMode {
    type Error = ConfigError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(AttributeMessageMode::TwoByte),
            1 => Ok(AttributeMessageMode::FourByte),
            2 => Ok(AttributeMessageMode::EightByte),
            3 => Ok(AttributeMessageMode::Disabled),
            _ => Err(ConfigError::InvalidEnum {
                field: "attribute message mode",
                value,
            }),
        }
    }
}

/// First-computation cache of the configuration fingerprint
///
/// Not part of equality, cloning or any serialized form.
#[derive(Debug, Default)]
struct HashCache(OnceLock<Fingerprint>);

impl Clone for HashCache {
    fn clone(&self) -> Self {
        HashCache::default()
    }
}

impl PartialEq for HashCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for HashCache {}

/// The configuration used to start hosts and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfiguration {
    /// Peers with different protocol versions do not talk to each other
    pub protocol_version: u16,

    pub transport: TransportKind,

    /// Channels in registration order
    pub channels: Vec<ChannelSpec>,

    pub message_types: Vec<MessageTypeSpec>,

    /// Scene names usable during networked games
    pub registered_scenes: Vec<String>,

    pub networked_prefabs: Vec<PrefabSpec>,

    /// Size of the receive buffer, i.e. the largest message
    pub message_buffer_size: u32,

    /// Times per second the receive queue is drained
    pub receive_tickrate: u32,

    /// Upper bound of events processed per receive tick
    pub max_receive_events_per_tick: u32,

    /// Times per second pending messages are flushed
    pub send_tickrate: u32,

    /// Times per second internal frame events run
    pub event_tickrate: u32,

    pub max_connections: u32,

    pub connect_port: u16,

    pub connect_address: String,

    /// Seconds a client gets to complete the handshake
    pub client_connection_buffer_timeout: u32,

    pub connection_approval: bool,

    /// Seconds of lag compensation history to keep
    pub seconds_history: u32,

    pub handle_object_spawning: bool,

    pub enable_encryption: bool,

    pub sign_key_exchange: bool,

    pub allow_passthrough_messages: bool,

    pub enable_scene_switching: bool,

    pub enable_time_resync: bool,

    pub attribute_message_mode: AttributeMessageMode,

    #[serde(skip)]
    hash_cache: HashCache,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            protocol_version: 0,
            transport: TransportKind::Udp,
            channels: Vec::new(),
            message_types: Vec::new(),
            registered_scenes: Vec::new(),
            networked_prefabs: Vec::new(),
            message_buffer_size: 65535,
            receive_tickrate: 64,
            max_receive_events_per_tick: 500,
            send_tickrate: 64,
            event_tickrate: 64,
            max_connections: 100,
            connect_port: 7777,
            connect_address: "127.0.0.1".to_string(),
            client_connection_buffer_timeout: 10,
            connection_approval: false,
            seconds_history: 5,
            handle_object_spawning: true,
            enable_encryption: true,
            sign_key_exchange: true,
            allow_passthrough_messages: true,
            enable_scene_switching: true,
            enable_time_resync: false,
            attribute_message_mode: AttributeMessageMode::Disabled,
            hash_cache: HashCache::default(),
        }
    }
}

impl SessionConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, name: impl Into<String>, kind: ChannelKind) -> Self {
        self.channels.push(ChannelSpec::new(name, kind));
        self
    }

    pub fn with_encrypted_channel(mut self, name: impl Into<String>, kind: ChannelKind) -> Self {
        self.channels.push(ChannelSpec::new(name, kind).encrypted(true));
        self
    }

    pub fn with_message_type(mut self, name: impl Into<String>, passthrough: bool) -> Self {
        self.message_types.push(MessageTypeSpec::new(name, passthrough));
        self
    }

    pub fn with_scene(mut self, name: impl Into<String>) -> Self {
        self.registered_scenes.push(name.into());
        self
    }

    pub fn with_prefab(mut self, name: impl Into<String>, player_prefab: bool) -> Self {
        self.networked_prefabs.push(PrefabSpec::new(name, player_prefab));
        self
    }

    /// Looks up a channel by name
    pub fn channel(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    /// Name of the player prefab, if one is flagged
    pub fn player_prefab(&self) -> Option<&str> {
        self.networked_prefabs
            .iter()
            .find(|prefab| prefab.player_prefab)
            .map(|prefab| prefab.name.as_str())
    }

    /// Returns the compatibility fingerprint
    ///
    /// With `cache` set, the first computed value is kept and returned on
    /// later calls, even if fields change afterwards; call
    /// [`clear_config_hash`](Self::clear_config_hash) after mutating. Without
    /// `cache`, the fingerprint is recomputed from the current fields and the
    /// cache is left untouched.
    pub fn config_hash(&self, cache: bool) -> Result<Fingerprint> {
        if !cache {
            return fingerprint::fingerprint(self);
        }
        if let Some(hash) = self.hash_cache.0.get() {
            return Ok(*hash);
        }
        let hash = fingerprint::fingerprint(self)?;
        Ok(*self.hash_cache.0.get_or_init(|| hash))
    }

    /// Drops the cached fingerprint
    pub fn clear_config_hash(&mut self) {
        self.hash_cache.0.take();
    }

    /// Compares a remote fingerprint with this configuration's cached one
    pub fn compare_config(&self, remote: &[u8]) -> bool {
        match self.config_hash(true) {
            Ok(local) => local.as_bytes().as_slice() == remote,
            Err(e) => {
                tracing::warn!(error = %e, "Configuration cannot be fingerprinted");
                false
            }
        }
    }

    /// Serializes to the canonical binary form wrapped in standard base64
    pub fn to_base64(&self) -> Result<String> {
        let bytes = codec::encode(self)?;
        Ok(data_encoding::BASE64.encode(&bytes))
    }

    /// Parses base64 text produced by [`to_base64`](Self::to_base64)
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = data_encoding::BASE64
            .decode(text.trim().as_bytes())
            .map_err(|e| ConfigError::InvalidBase64(e.to_string()))?;
        codec::decode(&bytes)
    }

    /// Loads a configuration from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfiguration::default();
        assert_eq!(config.message_buffer_size, 65535);
        assert_eq!(config.receive_tickrate, 64);
        assert_eq!(config.max_receive_events_per_tick, 500);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.connect_port, 7777);
        assert_eq!(config.connect_address, "127.0.0.1");
        assert!(config.handle_object_spawning);
        assert!(config.enable_encryption);
        assert!(!config.enable_time_resync);
        assert_eq!(config.attribute_message_mode, AttributeMessageMode::Disabled);
    }

    #[test]
    fn test_enum_ranges() {
        assert_eq!(TransportKind::try_from(2).unwrap(), TransportKind::Memory);
        assert!(TransportKind::try_from(4).is_err());
        assert_eq!(
            AttributeMessageMode::try_from(1).unwrap(),
            AttributeMessageMode::FourByte
        );
        assert!(AttributeMessageMode::try_from(4).is_err());
    }

    #[test]
    fn test_lookup_helpers() {
        let config = SessionConfiguration::new()
            .with_channel("Reliable", ChannelKind::Reliable)
            .with_prefab("Crate", false)
            .with_prefab("Player", true);

        assert_eq!(config.channel("Reliable").unwrap().kind, ChannelKind::Reliable);
        assert!(config.channel("Missing").is_none());
        assert_eq!(config.player_prefab(), Some("Player"));
    }

    #[test]
    fn test_cache_ignored_by_equality_and_clone() {
        let config = SessionConfiguration::new().with_scene("Lobby");
        let hash = config.config_hash(true).unwrap();

        let copy = config.clone();
        assert_eq!(copy, config);
        assert_eq!(copy.config_hash(false).unwrap(), hash);
    }

    #[test]
    fn test_cached_hash_is_sticky_until_cleared() {
        let mut config = SessionConfiguration::new();
        let original = config.config_hash(true).unwrap();

        config.protocol_version = 7;
        assert_eq!(config.config_hash(true).unwrap(), original);
        assert_ne!(config.config_hash(false).unwrap(), original);

        config.clear_config_hash();
        assert_ne!(config.config_hash(true).unwrap(), original);
    }

    #[test]
    fn test_json_missing_fields_take_defaults() {
        let config = SessionConfiguration::from_json(
            r#"{ "protocol_version": 3, "channels": [ { "name": "Fast", "kind": "UnreliableSequenced" } ] }"#,
        )
        .unwrap();

        assert_eq!(config.protocol_version, 3);
        assert_eq!(config.channels[0].kind, ChannelKind::UnreliableSequenced);
        assert!(!config.channels[0].encrypted);
        assert_eq!(config.max_connections, 100);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SessionConfiguration::new()
            .with_encrypted_channel("Secure", ChannelKind::ReliableSequenced)
            .with_message_type("Chat", true);
        let text = config.to_json().unwrap();
        assert_eq!(SessionConfiguration::from_json(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        let result = SessionConfiguration::from_json("{ not json");
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }

    #[test]
    fn test_invalid_base64() {
        let result = SessionConfiguration::from_base64("***");
        assert!(matches!(result, Err(ConfigError::InvalidBase64(_))));
    }
}
