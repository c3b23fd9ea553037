//! Channel, message type and prefab descriptors
//!
//! A [`ChannelSpec`] names one logical channel and its delivery class. The
//! order of channels inside a configuration is significant: it is the order
//! they are registered with a backend and the order they are serialized.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Delivery class of a channel
///
/// Discriminants are stable: they are written to the configuration wire form
/// (5 bits) and into the fingerprint (one full byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelKind {
    Unreliable = 0,
    UnreliableFragmented = 1,
    UnreliableSequenced = 2,
    Reliable = 3,
    ReliableFragmented = 4,
    ReliableSequenced = 5,
    StateUpdate = 6,
    ReliableStateUpdate = 7,
    AllCostDelivery = 8,
    UnreliableFragmentedSequenced = 9,
    ReliableFragmentedSequenced = 10,
}

impl ChannelKind {
    /// All kinds in discriminant order
    pub const ALL: [ChannelKind; 11] = [
        ChannelKind::Unreliable,
        ChannelKind::UnreliableFragmented,
        ChannelKind::UnreliableSequenced,
        ChannelKind::Reliable,
        ChannelKind::ReliableFragmented,
        ChannelKind::ReliableSequenced,
        ChannelKind::StateUpdate,
        ChannelKind::ReliableStateUpdate,
        ChannelKind::AllCostDelivery,
        ChannelKind::UnreliableFragmentedSequenced,
        ChannelKind::ReliableFragmentedSequenced,
    ];

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true if delivery is guaranteed
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            ChannelKind::Reliable
                | ChannelKind::ReliableFragmented
                | ChannelKind::ReliableSequenced
                | ChannelKind::ReliableStateUpdate
                | ChannelKind::AllCostDelivery
                | ChannelKind::ReliableFragmentedSequenced
        )
    }

    /// Returns true if stale payloads are discarded instead of delivered late
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            ChannelKind::UnreliableSequenced
                | ChannelKind::ReliableSequenced
                | ChannelKind::StateUpdate
                | ChannelKind::ReliableStateUpdate
                | ChannelKind::UnreliableFragmentedSequenced
                | ChannelKind::ReliableFragmentedSequenced
        )
    }

    /// Returns true if payloads larger than one datagram are split
    pub fn is_fragmented(self) -> bool {
        matches!(
            self,
            ChannelKind::UnreliableFragmented
                | ChannelKind::ReliableFragmented
                | ChannelKind::UnreliableFragmentedSequenced
                | ChannelKind::ReliableFragmentedSequenced
        )
    }
}

impl TryFrom<u8> for ChannelKind {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ChannelKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(ConfigError::InvalidEnum {
                field: "channel kind",
                value,
            })
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One logical communication channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Unique label, used for lookup and in the wire form
    pub name: String,

    /// Delivery class
    pub kind: ChannelKind,

    /// Payloads are encrypted (only meaningful when encryption is enabled)
    #[serde(default)]
    pub encrypted: bool,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            encrypted: false,
        }
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }
}

/// A named application message type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTypeSpec {
    pub name: String,

    /// Server relays the message between clients without inspecting it
    #[serde(default)]
    pub passthrough: bool,
}

impl MessageTypeSpec {
    pub fn new(name: impl Into<String>, passthrough: bool) -> Self {
        Self {
            name: name.into(),
            passthrough,
        }
    }
}

/// Name of a spawnable prefab and whether it is the player prefab
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefabSpec {
    pub name: String,

    #[serde(default)]
    pub player_prefab: bool,
}

impl PrefabSpec {
    pub fn new(name: impl Into<String>, player_prefab: bool) -> Self {
        Self {
            name: name.into(),
            player_prefab,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_discriminants_are_stable() {
        for (index, kind) in ChannelKind::ALL.iter().enumerate() {
            assert_eq!(kind.as_u8() as usize, index);
            assert_eq!(ChannelKind::try_from(index as u8).unwrap(), *kind);
        }
    }

    #[test]
    fn test_kind_out_of_range() {
        let err = ChannelKind::try_from(11).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnum {
                field: "channel kind",
                value: 11
            }
        );
    }

    #[test]
    fn test_kind_predicates() {
        assert!(ChannelKind::ReliableFragmentedSequenced.is_reliable());
        assert!(ChannelKind::ReliableFragmentedSequenced.is_sequenced());
        assert!(ChannelKind::ReliableFragmentedSequenced.is_fragmented());
        assert!(!ChannelKind::Unreliable.is_reliable());
        assert!(!ChannelKind::Unreliable.is_sequenced());
        assert!(ChannelKind::StateUpdate.is_sequenced());
        assert!(!ChannelKind::StateUpdate.is_reliable());
    }

    #[test]
    fn test_channel_builder() {
        let channel = ChannelSpec::new("Position", ChannelKind::StateUpdate).encrypted(true);
        assert_eq!(channel.name, "Position");
        assert!(channel.encrypted);
    }
}
