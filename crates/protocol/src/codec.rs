//! Canonical binary form of a [`SessionConfiguration`]
//!
//! Fields are written in a fixed order with [`BitWriter`]:
//!
//! ```text
//! protocol_version                u16
//! transport                       5 bits
//! channels                        u16 count, then (name, encrypted bit, kind 5 bits)
//! message_types                   u16 count, then (name, passthrough bit)
//! registered_scenes               u16 count, then name
//! networked_prefabs               u16 count, then (player_prefab bit, name)
//! message_buffer_size             u32
//! receive_tickrate                u32
//! max_receive_events_per_tick     u32
//! send_tickrate                   u32
//! event_tickrate                  u32
//! max_connections                 u32
//! connect_port                    u16
//! connect_address                 string
//! client_connection_buffer_timeout u32
//! connection_approval             bit
//! seconds_history                 u32
//! handle_object_spawning          bit
//! enable_encryption               bit
//! sign_key_exchange               bit
//! allow_passthrough_messages      bit
//! enable_scene_switching          bit
//! enable_time_resync              bit
//! attribute_message_mode          3 bits
//! ```
//!
//! Strings are a `u16` byte length followed by UTF-8. Decoding is strict:
//! every byte must be consumed and the final padding must be zero.

use bytes::Bytes;

use crate::bits::{BitReader, BitWriter};
use crate::channel::{ChannelKind, ChannelSpec, MessageTypeSpec, PrefabSpec};
use crate::config::{AttributeMessageMode, SessionConfiguration, TransportKind};
use crate::error::ConfigResult as Result;

/// Bit width of the transport selector
pub const TRANSPORT_BITS: u32 = 5;

/// Bit width of a channel kind
pub const CHANNEL_KIND_BITS: u32 = 5;

/// Bit width of the attribute message mode
pub const ATTRIBUTE_MODE_BITS: u32 = 3;

// Smallest encoding of one element of each sequence: an empty name plus the
// element's fixed-width fields.
const MIN_CHANNEL_BITS: usize = 16 + 1 + CHANNEL_KIND_BITS as usize;
const MIN_MESSAGE_TYPE_BITS: usize = 16 + 1;
const MIN_SCENE_BITS: usize = 16;
const MIN_PREFAB_BITS: usize = 1 + 16;

/// Encodes the configuration into its canonical binary form
///
/// Fails only if a sequence or string is longer than its `u16` prefix allows.
pub fn encode(config: &SessionConfiguration) -> Result<Bytes> {
    let mut writer = BitWriter::with_capacity(128);

    writer.write_u16(config.protocol_version);
    writer.write_bits(config.transport as u64, TRANSPORT_BITS);

    writer.write_count("channels", config.channels.len())?;
    for channel in &config.channels {
        writer.write_string("channel name", &channel.name)?;
        writer.write_bool(channel.encrypted);
        writer.write_bits(channel.kind.as_u8() as u64, CHANNEL_KIND_BITS);
    }

    writer.write_count("message types", config.message_types.len())?;
    for message_type in &config.message_types {
        writer.write_string("message type name", &message_type.name)?;
        writer.write_bool(message_type.passthrough);
    }

    writer.write_count("scenes", config.registered_scenes.len())?;
    for scene in &config.registered_scenes {
        writer.write_string("scene name", scene)?;
    }

    writer.write_count("prefabs", config.networked_prefabs.len())?;
    for prefab in &config.networked_prefabs {
        writer.write_bool(prefab.player_prefab);
        writer.write_string("prefab name", &prefab.name)?;
    }

    writer.write_u32(config.message_buffer_size);
    writer.write_u32(config.receive_tickrate);
    writer.write_u32(config.max_receive_events_per_tick);
    writer.write_u32(config.send_tickrate);
    writer.write_u32(config.event_tickrate);
    writer.write_u32(config.max_connections);
    writer.write_u16(config.connect_port);
    writer.write_string("connect address", &config.connect_address)?;
    writer.write_u32(config.client_connection_buffer_timeout);
    writer.write_bool(config.connection_approval);
    writer.write_u32(config.seconds_history);
    writer.write_bool(config.handle_object_spawning);
    writer.write_bool(config.enable_encryption);
    writer.write_bool(config.sign_key_exchange);
    writer.write_bool(config.allow_passthrough_messages);
    writer.write_bool(config.enable_scene_switching);
    writer.write_bool(config.enable_time_resync);
    writer.write_bits(config.attribute_message_mode as u64, ATTRIBUTE_MODE_BITS);

    Ok(writer.finish())
}

/// Decodes a configuration written by [`encode`]
pub fn decode(bytes: &[u8]) -> Result<SessionConfiguration> {
    let mut reader = BitReader::new(bytes);
    let mut config = SessionConfiguration::default();

    config.protocol_version = reader.read_u16()?;
    config.transport = TransportKind::try_from(reader.read_bits(TRANSPORT_BITS)? as u8)?;

    let count = reader.read_count("channels", MIN_CHANNEL_BITS)?;
    config.channels = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.read_string()?;
        let encrypted = reader.read_bool()?;
        let kind = ChannelKind::try_from(reader.read_bits(CHANNEL_KIND_BITS)? as u8)?;
        config.channels.push(ChannelSpec {
            name,
            kind,
            encrypted,
        });
    }

    let count = reader.read_count("message types", MIN_MESSAGE_TYPE_BITS)?;
    config.message_types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.read_string()?;
        let passthrough = reader.read_bool()?;
        config
            .message_types
            .push(MessageTypeSpec { name, passthrough });
    }

    let count = reader.read_count("scenes", MIN_SCENE_BITS)?;
    config.registered_scenes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        config.registered_scenes.push(reader.read_string()?);
    }

    let count = reader.read_count("prefabs", MIN_PREFAB_BITS)?;
    config.networked_prefabs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let player_prefab = reader.read_bool()?;
        let name = reader.read_string()?;
        config.networked_prefabs.push(PrefabSpec {
            name,
            player_prefab,
        });
    }

    config.message_buffer_size = reader.read_u32()?;
    config.receive_tickrate = reader.read_u32()?;
    config.max_receive_events_per_tick = reader.read_u32()?;
    config.send_tickrate = reader.read_u32()?;
    config.event_tickrate = reader.read_u32()?;
    config.max_connections = reader.read_u32()?;
    config.connect_port = reader.read_u16()?;
    config.connect_address = reader.read_string()?;
    config.client_connection_buffer_timeout = reader.read_u32()?;
    config.connection_approval = reader.read_bool()?;
    config.seconds_history = reader.read_u32()?;
    config.handle_object_spawning = reader.read_bool()?;
    config.enable_encryption = reader.read_bool()?;
    config.sign_key_exchange = reader.read_bool()?;
    config.allow_passthrough_messages = reader.read_bool()?;
    config.enable_scene_switching = reader.read_bool()?;
    config.enable_time_resync = reader.read_bool()?;
    config.attribute_message_mode =
        AttributeMessageMode::try_from(reader.read_bits(ATTRIBUTE_MODE_BITS)? as u8)?;

    reader.finish()?;
    Ok(config)
}
