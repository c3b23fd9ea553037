//! Per-connection state machine and event sequencing
//!
//! State transitions:
//! ```text
//! Disconnected → Connecting → Connected
//!       ↑             ↓            ↓
//!       └─────────────┴────────────┘
//!           (refused, timeout or disconnect)
//! ```
//!
//! A remote peer that connects to a listen host skips `Connecting`.
//!
//! [`ConnectionTable`] applies the state machine to the stream of backend
//! events so that, per identity, the core only ever sees
//! `Connect → Data* → Disconnect`.

use std::collections::HashMap;

use crate::error::{TransportError, TransportResult as Result};
use crate::identity::ConnectionIdentity;
use crate::transport::{EventKind, NativeError, NativeEvent, NetEvent, NativeEventKind};

/// Connection state in the transport state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Disconnected,

    /// Outbound connect issued, waiting for the backend's Connect
    Connecting,

    /// Connect delivered, payloads may flow
    Connected,
}

impl ConnectionState {
    /// Validates a state transition
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Disconnected, Connecting) => true,
            (Disconnected, Connected) => true, // inbound peer

            (Connecting, Connected) => true,
            (Connecting, Disconnected) => true, // refused or timed out

            (Connected, Disconnected) => true,

            (a, b) if a == &b => true,

            _ => false,
        }
    }

    /// Attempts to transition to a new state
    pub fn transition_to(&mut self, next: ConnectionState) -> Result<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(TransportError::InvalidStateTransition {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Tracks the state of every known connection
///
/// Unknown identities are `Disconnected`. Entries are removed when they
/// return to `Disconnected`.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    states: HashMap<ConnectionIdentity, ConnectionState>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, peer: ConnectionIdentity) -> ConnectionState {
        self.states.get(&peer).copied().unwrap_or_default()
    }

    /// Records an outbound connect attempt
    pub fn mark_connecting(&mut self, peer: ConnectionIdentity) -> Result<()> {
        let mut state = self.state(peer);
        state.transition_to(ConnectionState::Connecting)?;
        self.states.insert(peer, state);
        Ok(())
    }

    /// Returns true if payloads may be sent to `peer`
    pub fn can_send(&self, peer: ConnectionIdentity) -> bool {
        peer.is_remote() && self.state(peer).is_connected()
    }

    /// Applies a translated event and decides whether the core sees it
    ///
    /// - Connect for the local host or an invalid identity is dropped
    /// - a repeated Connect is surfaced again with a warning
    /// - Data for a peer that is not connected is dropped
    /// - Disconnect for an unknown peer is dropped
    pub fn admit(&mut self, kind: EventKind, peer: ConnectionIdentity) -> bool {
        match kind {
            EventKind::Nothing => false,
            EventKind::Connect => {
                if !peer.is_remote() {
                    tracing::warn!(peer = %peer, "Dropping connect for non-remote identity");
                    return false;
                }
                if self.state(peer).is_connected() {
                    tracing::warn!(peer = %peer, "Duplicate connect");
                }
                self.states.insert(peer, ConnectionState::Connected);
                true
            }
            EventKind::Data => {
                if self.can_send(peer) {
                    true
                } else {
                    tracing::debug!(peer = %peer, "Dropping data for unconnected peer");
                    false
                }
            }
            EventKind::Disconnect => self.states.remove(&peer).is_some(),
        }
    }

    /// Translates, sequences and unpacks a native event
    ///
    /// Returns `Ok(None)` if the event is dropped. A Data payload is copied
    /// into `buffer`; one that does not fit fails with
    /// [`TransportError::BufferTooSmall`] and is dropped. Errors other than
    /// Timeout on a non-Disconnect event are passed through as
    /// [`TransportError::Backend`].
    pub fn accept_native(
        &mut self,
        event: NativeEvent,
        buffer: &mut [u8],
    ) -> Result<Option<NetEvent>> {
        if !matches!(event.error, NativeError::Ok | NativeError::Timeout)
            && event.kind != NativeEventKind::Disconnect
        {
            return Err(event.error.into());
        }

        let kind = event.translate();
        let peer = event.identity();
        if !self.admit(kind, peer) {
            return Ok(None);
        }

        let net_event = match kind {
            EventKind::Data => {
                let len = event.payload.len();
                if len > buffer.len() {
                    return Err(TransportError::BufferTooSmall {
                        needed: len,
                        capacity: buffer.len(),
                    });
                }
                buffer[..len].copy_from_slice(&event.payload);
                NetEvent::data(peer, event.channel, len)
            }
            EventKind::Connect => NetEvent::connect(peer),
            EventKind::Disconnect => NetEvent::disconnect(peer),
            EventKind::Nothing => NetEvent::nothing(),
        };
        Ok(Some(net_event))
    }

    /// Forgets a peer without producing an event
    pub fn remove(&mut self, peer: ConnectionIdentity) -> ConnectionState {
        self.states.remove(&peer).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Identities currently connected
    pub fn connected(&self) -> impl Iterator<Item = ConnectionIdentity> + '_ {
        self.states
            .iter()
            .filter(|(_, state)| state.is_connected())
            .map(|(peer, _)| *peer)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
