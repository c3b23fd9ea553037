//! Channel and message type registries built from a configuration
//!
//! The channel registry owns the mapping from channel names to backend
//! [`ChannelHandle`]s. The internal channel is always registered first, so
//! its handle is stable across peers. Configured channels follow in
//! configuration order.

use std::collections::HashMap;

use crate::channel::ChannelKind;
use crate::config::SessionConfiguration;
use crate::error::{ConfigError, RegistryError};
use crate::transport::{ChannelHandle, Transport, TransportSettings};

/// Name under which the internal channel is registered
pub const INTERNAL_CHANNEL: &str = "TICKWIRE_INTERNAL";

/// Message type ids below this value are reserved for the networking layer
pub const FIRST_USER_MESSAGE_TYPE: u16 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChannelEntry {
    kind: ChannelKind,
    encrypted: bool,
}

/// Name to handle mapping of registered channels
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    handles: HashMap<String, ChannelHandle>,
    entries: HashMap<ChannelHandle, ChannelEntry>,
    encryption_enabled: bool,
}

impl ChannelRegistry {
    /// Registers the internal channel and then every configured channel
    pub fn register(
        config: &SessionConfiguration,
        transport: &mut dyn Transport,
        settings: &mut TransportSettings,
    ) -> Result<Self, RegistryError> {
        let mut registry = ChannelRegistry {
            encryption_enabled: config.enable_encryption,
            ..Default::default()
        };

        let internal = transport.internal_channel();
        let handle = transport.add_channel(internal, settings)?;
        registry.insert(INTERNAL_CHANNEL, handle, internal, false);

        for channel in &config.channels {
            if registry.handles.contains_key(&channel.name) {
                return Err(ConfigError::DuplicateName {
                    kind: "channel",
                    name: channel.name.clone(),
                }
                .into());
            }
            let handle = transport.add_channel(channel.kind, settings)?;
            registry.insert(&channel.name, handle, channel.kind, channel.encrypted);
        }

        tracing::debug!(channels = registry.len(), "Registered channels");
        Ok(registry)
    }

    fn insert(&mut self, name: &str, handle: ChannelHandle, kind: ChannelKind, encrypted: bool) {
        self.handles.insert(name.to_string(), handle);
        self.entries.insert(handle, ChannelEntry { kind, encrypted });
    }

    pub fn handle(&self, name: &str) -> Option<ChannelHandle> {
        self.handles.get(name).copied()
    }

    pub fn internal(&self) -> Option<ChannelHandle> {
        self.handle(INTERNAL_CHANNEL)
    }

    pub fn kind(&self, handle: ChannelHandle) -> Option<ChannelKind> {
        self.entries.get(&handle).map(|entry| entry.kind)
    }

    /// Returns true if payloads on `handle` are encrypted
    ///
    /// Always false while encryption is disabled in the configuration.
    pub fn is_encrypted(&self, handle: ChannelHandle) -> bool {
        self.encryption_enabled
            && self
                .entries
                .get(&handle)
                .map(|entry| entry.encrypted)
                .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Name to id mapping of application message types
#[derive(Debug, Clone, Default)]
pub struct MessageTypeRegistry {
    ids: HashMap<String, u16>,
    passthrough: Vec<bool>,
    passthrough_allowed: bool,
}

impl MessageTypeRegistry {
    /// Assigns ids in configuration order, starting at [`FIRST_USER_MESSAGE_TYPE`]
    pub fn from_config(config: &SessionConfiguration) -> Result<Self, ConfigError> {
        let mut registry = MessageTypeRegistry {
            passthrough_allowed: config.allow_passthrough_messages,
            ..Default::default()
        };

        for (index, message_type) in config.message_types.iter().enumerate() {
            let id = u16::try_from(index)
                .ok()
                .and_then(|index| FIRST_USER_MESSAGE_TYPE.checked_add(index))
                .ok_or(ConfigError::TooLong {
                    field: "message types",
                    len: config.message_types.len(),
                })?;

            if registry.ids.insert(message_type.name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateName {
                    kind: "message type",
                    name: message_type.name.clone(),
                });
            }
            registry.passthrough.push(message_type.passthrough);
        }

        Ok(registry)
    }

    pub fn id(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    /// Returns true if the server relays message type `id` without reading it
    ///
    /// Always false while passthrough messages are disallowed.
    pub fn is_passthrough(&self, id: u16) -> bool {
        if !self.passthrough_allowed || id < FIRST_USER_MESSAGE_TYPE {
            return false;
        }
        self.passthrough
            .get((id - FIRST_USER_MESSAGE_TYPE) as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
