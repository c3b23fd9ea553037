//! 160-bit compatibility fingerprint of a [`SessionConfiguration`]
//!
//! Two peers may talk to each other only if their fingerprints match. The
//! digest covers the protocol-relevant subset of the configuration; tick
//! rates, buffer sizes and addresses are left out. Parts of the subset are
//! gated by the flags that give them meaning:
//!
//! - a channel's `encrypted` bit only when `enable_encryption` is set
//! - a message type's `passthrough` bit only when `allow_passthrough_messages` is set
//! - scene names only when `enable_scene_switching` is set
//! - prefab names only when `handle_object_spawning` is set
//!
//! Sequences are written without a count prefix.

use std::fmt;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::bits::BitWriter;
use crate::codec::ATTRIBUTE_MODE_BITS;
use crate::config::SessionConfiguration;
use crate::error::ConfigResult as Result;

/// Fingerprint length in bytes
pub const FINGERPRINT_LEN: usize = 20;

/// SHA-1 digest identifying a protocol-compatible configuration
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Wraps a fingerprint received from a peer; `None` unless exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; FINGERPRINT_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Bytes that are digested into the fingerprint
pub fn fingerprint_preimage(config: &SessionConfiguration) -> Result<Bytes> {
    let mut writer = BitWriter::with_capacity(64);

    writer.write_u16(config.protocol_version);

    for channel in &config.channels {
        writer.write_string("channel name", &channel.name)?;
        writer.write_u8(channel.kind.as_u8());
        if config.enable_encryption {
            writer.write_bool(channel.encrypted);
        }
    }

    for message_type in &config.message_types {
        writer.write_string("message type name", &message_type.name)?;
        if config.allow_passthrough_messages {
            writer.write_bool(message_type.passthrough);
        }
    }

    if config.enable_scene_switching {
        for scene in &config.registered_scenes {
            writer.write_string("scene name", scene)?;
        }
    }

    if config.handle_object_spawning {
        for prefab in &config.networked_prefabs {
            writer.write_string("prefab name", &prefab.name)?;
        }
    }

    writer.write_bool(config.handle_object_spawning);
    writer.write_bool(config.enable_encryption);
    writer.write_bool(config.allow_passthrough_messages);
    writer.write_bool(config.enable_scene_switching);
    writer.write_bool(config.sign_key_exchange);
    writer.write_bits(config.attribute_message_mode as u64, ATTRIBUTE_MODE_BITS);

    Ok(writer.finish())
}

/// Computes the fingerprint from the configuration's current fields
pub fn fingerprint(config: &SessionConfiguration) -> Result<Fingerprint> {
    let preimage = fingerprint_preimage(config)?;
    let digest = Sha1::digest(&preimage);

    let mut bytes = [0u8; FINGERPRINT_LEN];
    bytes.copy_from_slice(&digest);
    Ok(Fingerprint(bytes))
}

/// Returns true if `remote` equals the freshly computed local fingerprint
///
/// Lengths must match; a configuration that cannot be fingerprinted never
/// compares equal.
pub fn compare(config: &SessionConfiguration, remote: &[u8]) -> bool {
    match fingerprint(config) {
        Ok(local) => local.as_ref() == remote,
        Err(e) => {
            tracing::warn!(error = %e, "Configuration cannot be fingerprinted");
            false
        }
    }
}
