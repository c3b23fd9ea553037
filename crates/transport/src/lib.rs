//! # tickwire transport backends
//!
//! Implementations of [`tickwire_protocol::transport::Transport`]:
//! - [`memory`]: an in-process network for tests and single-process sessions
//! - [`udp`]: the reference UDP backend, driven by tokio worker tasks
//!
//! Both backends sequence their events through
//! [`ConnectionTable`](tickwire_protocol::state::ConnectionTable), so a
//! caller only ever sees `Connect → Data* → Disconnect` per connection.

pub mod memory;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

use tickwire_protocol::config::TransportKind;
use tickwire_protocol::transport::Transport;
use tokio::runtime::Handle;

/// Builds the backend a configuration selects
///
/// Returns `None` for backend kinds this crate does not provide (relay and
/// custom backends are supplied by the application). A memory backend is
/// attached to a fresh [`MemoryNetwork`].
pub fn backend_for(kind: TransportKind, runtime: Handle) -> Option<Box<dyn Transport>> {
    match kind {
        TransportKind::Udp => Some(Box::new(UdpTransport::new(runtime))),
        TransportKind::Memory => Some(Box::new(MemoryNetwork::new().endpoint())),
        TransportKind::Relay | TransportKind::Custom => None,
    }
}
