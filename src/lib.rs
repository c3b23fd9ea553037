//! # tickwire
//!
//! Transport and configuration core for real-time multiplayer networking:
//! - Compact 32-bit connection identities
//! - Session network configuration with a canonical bit-packed wire form,
//!   base64 and JSON import/export
//! - SHA-1 configuration fingerprints for peer compatibility checks
//! - A poll-driven transport contract with in-memory and UDP backends
//!
//! ## Components
//!
//! - `tickwire-protocol`: identities, configuration, codec, fingerprint and the `Transport` trait
//! - `tickwire-transport`: the memory and UDP backends
//!
//! ## Example
//!
//! ```
//! use tickwire::protocol::{ChannelKind, ChannelRegistry, EventKind, SessionConfiguration, Transport};
//! use tickwire::transport::MemoryNetwork;
//!
//! let config = SessionConfiguration::default()
//!     .with_channel("Reliable", ChannelKind::Reliable)
//!     .with_channel("Fast", ChannelKind::UnreliableSequenced);
//!
//! let network = MemoryNetwork::new();
//! let mut server = network.endpoint();
//! let mut client = network.endpoint();
//!
//! let mut settings = server.settings();
//! let channels = ChannelRegistry::register(&config, &mut server, &mut settings).unwrap();
//! server.register_listen_socket(&settings, Box::new(|| {})).unwrap();
//! let peer = client.connect("127.0.0.1", 7777, &settings, Box::new(|| {})).unwrap();
//!
//! let mut buffer = vec![0u8; config.message_buffer_size as usize];
//! assert_eq!(client.poll_receive(&mut buffer).unwrap().kind, EventKind::Connect);
//! client.send(peer, b"hi", channels.handle("Fast").unwrap(), true).unwrap();
//! ```

pub use tickwire_protocol as protocol;
pub use tickwire_transport as transport;
