//! # tickwire protocol
//!
//! Core definitions shared by the tickwire networking layer and its
//! transport backends.
//!
//! This crate provides:
//! - `ConnectionIdentity`: the 32-bit connection handle and its tagged form
//! - `SessionConfiguration`: the session network configuration, its canonical
//!   bit-packed wire form and its SHA-1 compatibility fingerprint
//! - `ChannelSpec` / `ChannelKind`: channel descriptors
//! - `Transport`: the backend seam, with event translation and the
//!   per-connection state machine
//! - Channel and message type registries
//! - Error types for configuration and transport failures
//!
//! ## Example
//!
//! ```
//! use tickwire_protocol::{ChannelKind, SessionConfiguration};
//!
//! let config = SessionConfiguration::default()
//!     .with_channel("Reliable", ChannelKind::Reliable)
//!     .with_channel("Fast", ChannelKind::UnreliableSequenced)
//!     .with_message_type("Spawn", true);
//!
//! // Export the wire form and import it on another peer
//! let text = config.to_base64().unwrap();
//! let imported = SessionConfiguration::from_base64(&text).unwrap();
//!
//! // Both peers compute the same fingerprint
//! let local = config.config_hash(true).unwrap();
//! assert!(imported.compare_config(local.as_bytes()));
//! ```

pub mod bits;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod registry;
pub mod state;
pub mod transport;

pub use channel::{ChannelKind, ChannelSpec, MessageTypeSpec, PrefabSpec};
pub use config::{AttributeMessageMode, SessionConfiguration, TransportKind};
pub use error::{ConfigError, ConfigResult, RegistryError, TransportError, TransportResult};
pub use fingerprint::{Fingerprint, FINGERPRINT_LEN};
pub use identity::{ConnectionIdentity, NetId};
pub use registry::{ChannelRegistry, MessageTypeRegistry};
pub use state::{ConnectionState, ConnectionTable};
pub use transport::{
    translate_event, ChannelHandle, EventKind, ListenHost, NativeError, NativeEvent,
    NativeEventKind, NetEvent, OnComplete, Transport, TransportSettings,
};
