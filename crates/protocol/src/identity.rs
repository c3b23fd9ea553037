//! Connection identities and their 32-bit wire handle
//!
//! Backends address a connection by a `(host_id, connection_id)` pair. At the
//! transport boundary that pair, together with the "host" and "invalid"
//! markers, is folded into a single `u32` handle:
//!
//! ```text
//! ┌───────────────┬──────┬─────────┐
//! │ host_id       │ u8   │ 0..=7   │
//! ├───────────────┼──────┼─────────┤
//! │ connection_id │ u16  │ 8..=23  │
//! ├───────────────┼──────┼─────────┤
//! │ HOST flag     │ bit  │ 24      │
//! ├───────────────┼──────┼─────────┤
//! │ INVALID flag  │ bit  │ 25      │
//! ├───────────────┼──────┼─────────┤
//! │ reserved      │ 0    │ 26..=31 │
//! └───────────────┴──────┴─────────┘
//! ```
//!
//! Inside the core, identities are carried as [`ConnectionIdentity`], a tagged
//! value that cannot confuse the local host with a real remote connection.
//!
//! ## Example
//!
//! ```
//! use tickwire_protocol::identity::{ConnectionIdentity, NetId};
//!
//! let handle = NetId::new(3, 42, false, false).encode();
//! assert_eq!(NetId::decode(handle), NetId::new(3, 42, false, false));
//!
//! let peer = ConnectionIdentity::from_handle(handle);
//! assert_eq!(peer, ConnectionIdentity::remote(3, 42));
//! ```

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Bit offset of the host id
pub const HOST_ID_SHIFT: u32 = 0;

/// Width of the host id in bits
pub const HOST_ID_BITS: u32 = 8;

/// Bit offset of the connection id
pub const CONNECTION_ID_SHIFT: u32 = 8;

/// Width of the connection id in bits
pub const CONNECTION_ID_BITS: u32 = 16;

/// Bit offset of the flag byte
pub const FLAGS_SHIFT: u32 = 24;

/// Mask of every bit a handle may carry; the rest is reserved
pub const HANDLE_MASK: u32 = 0x03FF_FFFF;

bitflags! {
    /// Marker bits stored at [`FLAGS_SHIFT`]
    ///
    /// - bit 0: HOST - the handle denotes the local hosting peer
    /// - bit 1: INVALID - the handle denotes no connection at all
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NetIdFlags: u8 {
        const HOST = 0b0000_0001;
        const INVALID = 0b0000_0010;
    }
}

/// Raw four-field identity as it appears in the wire handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetId {
    /// Which backend socket/host owns the connection
    pub host_id: u8,

    /// Backend-local connection slot
    pub connection_id: u16,

    /// The handle denotes the local hosting peer
    pub is_host: bool,

    /// The handle denotes no connection
    pub is_invalid: bool,
}

impl NetId {
    pub fn new(host_id: u8, connection_id: u16, is_host: bool, is_invalid: bool) -> Self {
        Self {
            host_id,
            connection_id,
            is_host,
            is_invalid,
        }
    }

    fn flags(&self) -> NetIdFlags {
        let mut flags = NetIdFlags::empty();
        flags.set(NetIdFlags::HOST, self.is_host);
        flags.set(NetIdFlags::INVALID, self.is_invalid);
        flags
    }

    /// Packs the fields into a 32-bit handle
    #[inline]
    pub fn encode(&self) -> u32 {
        ((self.host_id as u32) << HOST_ID_SHIFT)
            | ((self.connection_id as u32) << CONNECTION_ID_SHIFT)
            | ((self.flags().bits() as u32) << FLAGS_SHIFT)
    }

    /// Unpacks a 32-bit handle; every input yields some tuple
    #[inline]
    pub fn decode(handle: u32) -> Self {
        let flags = NetIdFlags::from_bits_truncate((handle >> FLAGS_SHIFT) as u8);
        Self {
            host_id: (handle >> HOST_ID_SHIFT) as u8,
            connection_id: (handle >> CONNECTION_ID_SHIFT) as u16,
            is_host: flags.contains(NetIdFlags::HOST),
            is_invalid: flags.contains(NetIdFlags::INVALID),
        }
    }
}

/// Returns true if the handle has the host bit set
#[inline]
pub fn is_host_handle(handle: u32) -> bool {
    NetId::decode(handle).is_host
}

/// Returns true if the handle has the invalid bit set
#[inline]
pub fn is_invalid_handle(handle: u32) -> bool {
    NetId::decode(handle).is_invalid
}

/// Identity of a connection as seen by core logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionIdentity {
    /// A real connection owned by a backend host
    Remote { host_id: u8, connection_id: u16 },

    /// The local hosting peer
    Host,

    /// No such connection
    #[default]
    Invalid,
}

impl ConnectionIdentity {
    pub fn remote(host_id: u8, connection_id: u16) -> Self {
        ConnectionIdentity::Remote {
            host_id,
            connection_id,
        }
    }

    /// Classifies a raw identity; the invalid bit wins over the host bit
    pub fn from_net_id(net_id: NetId) -> Self {
        if net_id.is_invalid {
            ConnectionIdentity::Invalid
        } else if net_id.is_host {
            ConnectionIdentity::Host
        } else {
            ConnectionIdentity::remote(net_id.host_id, net_id.connection_id)
        }
    }

    pub fn to_net_id(&self) -> NetId {
        match *self {
            ConnectionIdentity::Remote {
                host_id,
                connection_id,
            } => NetId::new(host_id, connection_id, false, false),
            ConnectionIdentity::Host => NetId::new(0, 0, true, false),
            ConnectionIdentity::Invalid => NetId::new(0, 0, false, true),
        }
    }

    #[inline]
    pub fn from_handle(handle: u32) -> Self {
        Self::from_net_id(NetId::decode(handle))
    }

    #[inline]
    pub fn to_handle(&self) -> u32 {
        self.to_net_id().encode()
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        matches!(self, ConnectionIdentity::Host)
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        matches!(self, ConnectionIdentity::Invalid)
    }

    #[inline]
    pub fn is_remote(&self) -> bool {
        matches!(self, ConnectionIdentity::Remote { .. })
    }

    /// Returns the backend pair for a real connection
    #[inline]
    pub fn remote_parts(&self) -> Option<(u8, u16)> {
        match *self {
            ConnectionIdentity::Remote {
                host_id,
                connection_id,
            } => Some((host_id, connection_id)),
            _ => None,
        }
    }
}

impl From<NetId> for ConnectionIdentity {
    fn from(net_id: NetId) -> Self {
        Self::from_net_id(net_id)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionIdentity::Remote {
                host_id,
                connection_id,
            } => write!(f, "{}:{}", host_id, connection_id),
            ConnectionIdentity::Host => write!(f, "host"),
            ConnectionIdentity::Invalid => write!(f, "invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        assert_eq!(NetId::new(0xAB, 0, false, false).encode(), 0x0000_00AB);
        assert_eq!(NetId::new(0, 0xBEEF, false, false).encode(), 0x00BE_EF00);
        assert_eq!(NetId::new(0, 0, true, false).encode(), 0x0100_0000);
        assert_eq!(NetId::new(0, 0, false, true).encode(), 0x0200_0000);
    }

    #[test]
    fn test_roundtrip_example() {
        let handle = NetId::new(3, 42, false, false).encode();
        assert_eq!(NetId::decode(handle), NetId::new(3, 42, false, false));
    }

    #[test]
    fn test_decode_ignores_reserved_bits() {
        let handle = 0xFC00_0000 | NetId::new(7, 9, false, false).encode();
        assert_eq!(NetId::decode(handle), NetId::new(7, 9, false, false));
        assert_eq!(NetId::decode(handle).encode(), handle & HANDLE_MASK);
    }

    #[test]
    fn test_invalid_dominates_host() {
        let both = NetId::new(1, 2, true, true).encode();
        let net_id = NetId::decode(both);
        assert!(net_id.is_host);
        assert!(net_id.is_invalid);
        assert_eq!(ConnectionIdentity::from_handle(both), ConnectionIdentity::Invalid);
    }

    #[test]
    fn test_host_ignores_ids() {
        let handle = NetId::new(5, 77, true, false).encode();
        assert_eq!(ConnectionIdentity::from_handle(handle), ConnectionIdentity::Host);
    }

    #[test]
    fn test_identity_handles() {
        let remote = ConnectionIdentity::remote(3, 42);
        assert_eq!(ConnectionIdentity::from_handle(remote.to_handle()), remote);
        assert!(is_host_handle(ConnectionIdentity::Host.to_handle()));
        assert!(is_invalid_handle(ConnectionIdentity::Invalid.to_handle()));
        assert!(!is_host_handle(remote.to_handle()));
        assert!(!is_invalid_handle(remote.to_handle()));
    }

    #[test]
    fn test_zero_handle_is_a_real_connection() {
        assert_eq!(ConnectionIdentity::from_handle(0), ConnectionIdentity::remote(0, 0));
        assert_ne!(ConnectionIdentity::Invalid.to_handle(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionIdentity::remote(3, 42).to_string(), "3:42");
        assert_eq!(ConnectionIdentity::Host.to_string(), "host");
        assert_eq!(ConnectionIdentity::Invalid.to_string(), "invalid");
    }
}
