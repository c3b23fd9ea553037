//! Transport layer abstraction for tickwire
//!
//! This module defines the [`Transport`] trait, the seam between the
//! tick-driven networking core and a concrete datagram backend (the UDP
//! backend, the in-process memory backend, or a relay). The core never sees
//! backend types: it addresses peers by [`ConnectionIdentity`], routes
//! payloads over [`ChannelHandle`]s and drains events with a non-blocking
//! [`Transport::poll_receive`] once per receive tick.
//!
//! Backends report events in their own vocabulary ([`NativeEvent`]).
//! [`translate_event`] maps that vocabulary onto the four kinds the core
//! understands:
//!
//! | native kind | native error | [`EventKind`] |
//! |---|---|---|
//! | any | `Timeout` | `Disconnect` |
//! | `Data` | `Ok` | `Data` |
//! | `Connect` | `Ok` | `Connect` |
//! | `Disconnect` | any | `Disconnect` |
//! | `Nothing` / `Broadcast` | `Ok` | `Nothing` |
//!
//! # Example: driving a backend
//!
//! ```no_run
//! use tickwire_protocol::transport::{EventKind, Transport};
//!
//! fn drain(transport: &mut dyn Transport, buffer: &mut [u8]) {
//!     loop {
//!         match transport.poll_receive(buffer) {
//!             Ok(event) if event.kind == EventKind::Nothing => break,
//!             Ok(event) => println!("{:?} from {}", event.kind, event.peer),
//!             Err(e) => eprintln!("receive failed: {}", e),
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use bytes::Bytes;

use crate::channel::ChannelKind;
use crate::config::SessionConfiguration;
use crate::error::{TransportError, TransportResult as Result};
use crate::identity::ConnectionIdentity;

/// Most channels a settings object can hold; handles are one byte
pub const MAX_CHANNELS: usize = 256;

/// Name of the listen host created by default
pub const DEFAULT_LISTEN_HOST_NAME: &str = "UDP Socket";

/// Port of the listen host created by default
pub const DEFAULT_LISTEN_PORT: u16 = 7777;

/// Callback invoked once a connect or listen request has been issued
pub type OnComplete = Box<dyn FnOnce() + Send>;

/// Opaque backend handle of a registered channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u8);

impl ChannelHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Named listen point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenHost {
    pub name: String,
    pub port: u16,
}

impl ListenHost {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Backend configuration object
///
/// Read-only once handed to [`Transport::connect`] or
/// [`Transport::register_listen_socket`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Registered channel kinds; a [`ChannelHandle`] indexes this list
    pub channels: Vec<ChannelKind>,

    /// Accepted peers per listen host
    pub max_connections: u16,

    /// Silence after which a peer is reported as timed out
    pub connection_timeout: Duration,

    /// Keepalive interval
    pub ping_interval: Duration,

    /// Address listen hosts bind to
    pub listen_address: IpAddr,

    pub listen_hosts: Vec<ListenHost>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            max_connections: 100,
            connection_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_millis(500),
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_hosts: vec![ListenHost::new(DEFAULT_LISTEN_HOST_NAME, DEFAULT_LISTEN_PORT)],
        }
    }
}

impl TransportSettings {
    /// Derives backend settings from a session configuration
    ///
    /// Channels are not copied; register them through
    /// [`ChannelRegistry`](crate::registry::ChannelRegistry) so the internal
    /// channel comes first.
    pub fn from_config(config: &SessionConfiguration) -> Self {
        Self {
            max_connections: u16::try_from(config.max_connections).unwrap_or(u16::MAX),
            connection_timeout: Duration::from_secs(config.client_connection_buffer_timeout as u64),
            listen_hosts: vec![ListenHost::new(DEFAULT_LISTEN_HOST_NAME, config.connect_port)],
            ..Self::default()
        }
    }

    /// Appends a channel and returns its handle
    pub fn add_channel(&mut self, kind: ChannelKind) -> Result<ChannelHandle> {
        if self.channels.len() >= MAX_CHANNELS {
            return Err(TransportError::TooManyChannels { max: MAX_CHANNELS });
        }
        let handle = ChannelHandle(self.channels.len() as u8);
        self.channels.push(kind);
        Ok(handle)
    }

    pub fn channel_kind(&self, handle: ChannelHandle) -> Option<ChannelKind> {
        self.channels.get(handle.index()).copied()
    }

    /// Fails with [`TransportError::UnknownChannel`] for unregistered handles
    pub fn check_channel(&self, handle: ChannelHandle) -> Result<ChannelKind> {
        self.channel_kind(handle)
            .ok_or(TransportError::UnknownChannel(handle))
    }
}

/// Event kinds the networking core understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Connect,
    Disconnect,
    /// The receive queue is empty
    Nothing,
}

/// One translated event returned by [`Transport::poll_receive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetEvent {
    pub kind: EventKind,

    pub peer: ConnectionIdentity,

    /// Channel the payload arrived on (Data only)
    pub channel: Option<ChannelHandle>,

    /// Bytes written to the receive buffer (Data only)
    pub received: usize,
}

impl NetEvent {
    pub fn nothing() -> Self {
        Self {
            kind: EventKind::Nothing,
            peer: ConnectionIdentity::Invalid,
            channel: None,
            received: 0,
        }
    }

    pub fn connect(peer: ConnectionIdentity) -> Self {
        Self {
            kind: EventKind::Connect,
            peer,
            channel: None,
            received: 0,
        }
    }

    pub fn disconnect(peer: ConnectionIdentity) -> Self {
        Self {
            kind: EventKind::Disconnect,
            peer,
            channel: None,
            received: 0,
        }
    }

    pub fn data(peer: ConnectionIdentity, channel: ChannelHandle, received: usize) -> Self {
        Self {
            kind: EventKind::Data,
            peer,
            channel: Some(channel),
            received,
        }
    }

    #[inline]
    pub fn is_nothing(&self) -> bool {
        self.kind == EventKind::Nothing
    }
}

/// Event kinds a backend reports natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeEventKind {
    Data,
    Connect,
    Disconnect,
    Nothing,
    /// Discovery broadcast; not modelled by the core
    Broadcast,
}

/// Native backend error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum NativeError {
    #[default]
    Ok = 0,
    WrongHost = 1,
    WrongConnection = 2,
    WrongChannel = 3,
    NoResources = 4,
    BadMessage = 5,
    Timeout = 6,
    MessageTooLong = 7,
    WrongOperation = 8,
}

impl NativeError {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(NativeError::Ok),
            1 => Some(NativeError::WrongHost),
            2 => Some(NativeError::WrongConnection),
            3 => Some(NativeError::WrongChannel),
            4 => Some(NativeError::NoResources),
            5 => Some(NativeError::BadMessage),
            6 => Some(NativeError::Timeout),
            7 => Some(NativeError::MessageTooLong),
            8 => Some(NativeError::WrongOperation),
            _ => None,
        }
    }
}

/// An event as a backend reports it, before translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeEvent {
    pub kind: NativeEventKind,
    pub error: NativeError,
    pub host_id: u8,
    pub connection_id: u16,
    pub channel: ChannelHandle,
    pub payload: Bytes,
}

impl NativeEvent {
    pub fn new(kind: NativeEventKind, host_id: u8, connection_id: u16) -> Self {
        Self {
            kind,
            error: NativeError::Ok,
            host_id,
            connection_id,
            channel: ChannelHandle(0),
            payload: Bytes::new(),
        }
    }

    pub fn data(host_id: u8, connection_id: u16, channel: ChannelHandle, payload: Bytes) -> Self {
        Self {
            channel,
            payload,
            ..Self::new(NativeEventKind::Data, host_id, connection_id)
        }
    }

    /// Backend reported that the peer stopped answering
    pub fn timeout(host_id: u8, connection_id: u16) -> Self {
        Self {
            error: NativeError::Timeout,
            ..Self::new(NativeEventKind::Nothing, host_id, connection_id)
        }
    }

    pub fn with_error(mut self, error: NativeError) -> Self {
        self.error = error;
        self
    }

    #[inline]
    pub fn translate(&self) -> EventKind {
        translate_event(self.kind, self.error)
    }

    #[inline]
    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::remote(self.host_id, self.connection_id)
    }
}

/// Maps a native event kind and error code onto the core's vocabulary
pub fn translate_event(kind: NativeEventKind, error: NativeError) -> EventKind {
    if error == NativeError::Timeout {
        return EventKind::Disconnect;
    }
    match kind {
        NativeEventKind::Data => EventKind::Data,
        NativeEventKind::Connect => EventKind::Connect,
        NativeEventKind::Disconnect => EventKind::Disconnect,
        NativeEventKind::Nothing | NativeEventKind::Broadcast => EventKind::Nothing,
    }
}

/// Transport layer abstraction for datagram backends
///
/// The trait is object safe; the networking core holds a
/// `Box<dyn Transport>` selected from the configuration's
/// [`TransportKind`](crate::config::TransportKind).
///
/// Operations that name a peer are silent no-ops when the identity is the
/// local host, invalid, or not connected.
///
/// # Example: implementing a custom transport
///
/// ```no_run
/// use tickwire_protocol::error::TransportResult;
/// use tickwire_protocol::identity::ConnectionIdentity;
/// use tickwire_protocol::transport::{
///     ChannelHandle, NetEvent, OnComplete, Transport, TransportSettings,
/// };
///
/// struct Loopback;
///
/// impl Transport for Loopback {
///     fn settings(&self) -> TransportSettings {
///         TransportSettings::default()
///     }
///
///     fn connect(
///         &mut self,
///         _address: &str,
///         _port: u16,
///         _settings: &TransportSettings,
///         on_complete: OnComplete,
///     ) -> TransportResult<ConnectionIdentity> {
///         on_complete();
///         Ok(ConnectionIdentity::remote(0, 1))
///     }
///
///     fn register_listen_socket(
///         &mut self,
///         _settings: &TransportSettings,
///         on_ready: OnComplete,
///     ) -> TransportResult<()> {
///         on_ready();
///         Ok(())
///     }
///
///     fn disconnect_client(&mut self, _peer: ConnectionIdentity) {}
///
///     fn disconnect_self(&mut self) {}
///
///     fn poll_receive(&mut self, _buffer: &mut [u8]) -> TransportResult<NetEvent> {
///         Ok(NetEvent::nothing())
///     }
///
///     fn send(
///         &mut self,
///         _peer: ConnectionIdentity,
///         _payload: &[u8],
///         _channel: ChannelHandle,
///         _immediate: bool,
///     ) -> TransportResult<()> {
///         Ok(())
///     }
///
///     fn flush_queued(&mut self, _peer: ConnectionIdentity) -> TransportResult<()> {
///         Ok(())
///     }
///
///     fn current_rtt(&self, _peer: ConnectionIdentity) -> TransportResult<u32> {
///         Ok(0)
///     }
///
///     fn network_timestamp(&self) -> u32 {
///         0
///     }
///
///     fn remote_delay(
///         &self,
///         _peer: ConnectionIdentity,
///         _remote_timestamp: u32,
///     ) -> TransportResult<u32> {
///         Ok(0)
///     }
///
///     fn shutdown(&mut self) {}
/// }
/// ```
pub trait Transport: Send {
    /// Channel kind the networking layer uses for its own messages
    fn internal_channel(&self) -> ChannelKind {
        ChannelKind::ReliableFragmentedSequenced
    }

    /// Returns a fresh backend configuration object
    fn settings(&self) -> TransportSettings;

    /// Registers a channel in `settings` and returns its handle
    fn add_channel(
        &mut self,
        kind: ChannelKind,
        settings: &mut TransportSettings,
    ) -> Result<ChannelHandle> {
        settings.add_channel(kind)
    }

    /// Starts an outbound connection
    ///
    /// `on_complete` runs once the attempt has been issued. The Connect (or
    /// a Disconnect if the attempt fails) arrives later through
    /// [`poll_receive`](Self::poll_receive).
    fn connect(
        &mut self,
        address: &str,
        port: u16,
        settings: &TransportSettings,
        on_complete: OnComplete,
    ) -> Result<ConnectionIdentity>;

    /// Binds every listen host in `settings`, then runs `on_ready` once
    fn register_listen_socket(
        &mut self,
        settings: &TransportSettings,
        on_ready: OnComplete,
    ) -> Result<()>;

    /// Drops a remote peer
    fn disconnect_client(&mut self, peer: ConnectionIdentity);

    /// Leaves the server this endpoint connected to
    fn disconnect_self(&mut self);

    /// Returns the next event without blocking
    ///
    /// Data payloads are copied into `buffer`; a payload that does not fit
    /// is dropped with [`TransportError::BufferTooSmall`].
    fn poll_receive(&mut self, buffer: &mut [u8]) -> Result<NetEvent>;

    /// Sends a payload, or queues it until [`flush_queued`](Self::flush_queued)
    /// unless `immediate` is set
    fn send(
        &mut self,
        peer: ConnectionIdentity,
        payload: &[u8],
        channel: ChannelHandle,
        immediate: bool,
    ) -> Result<()>;

    /// Delivers queued payloads for a peer
    fn flush_queued(&mut self, peer: ConnectionIdentity) -> Result<()>;

    /// Round trip time to a peer in milliseconds
    fn current_rtt(&self, peer: ConnectionIdentity) -> Result<u32>;

    /// Local network clock in milliseconds
    fn network_timestamp(&self) -> u32;

    /// Milliseconds since a peer stamped `remote_timestamp` on its clock
    fn remote_delay(&self, peer: ConnectionIdentity, remote_timestamp: u32) -> Result<u32>;

    /// Closes every connection and socket; idempotent
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_event() {
        assert_eq!(
            translate_event(NativeEventKind::Data, NativeError::Ok),
            EventKind::Data
        );
        assert_eq!(
            translate_event(NativeEventKind::Connect, NativeError::Ok),
            EventKind::Connect
        );
        assert_eq!(
            translate_event(NativeEventKind::Disconnect, NativeError::Ok),
            EventKind::Disconnect
        );
        assert_eq!(
            translate_event(NativeEventKind::Nothing, NativeError::Ok),
            EventKind::Nothing
        );
        assert_eq!(
            translate_event(NativeEventKind::Broadcast, NativeError::Ok),
            EventKind::Nothing
        );
    }

    #[test]
    fn test_timeout_becomes_disconnect() {
        for kind in [
            NativeEventKind::Data,
            NativeEventKind::Connect,
            NativeEventKind::Nothing,
            NativeEventKind::Broadcast,
        ] {
            assert_eq!(translate_event(kind, NativeError::Timeout), EventKind::Disconnect);
        }
        assert_eq!(NativeEvent::timeout(1, 2).translate(), EventKind::Disconnect);
    }

    #[test]
    fn test_native_error_codes() {
        for code in 0..=8 {
            assert_eq!(NativeError::from_code(code).unwrap().code(), code);
        }
        assert_eq!(NativeError::from_code(9), None);
        assert_eq!(NativeError::Timeout.code(), 6);
    }

    #[test]
    fn test_settings_channels() {
        let mut settings = TransportSettings::default();
        let first = settings.add_channel(ChannelKind::ReliableFragmentedSequenced).unwrap();
        let second = settings.add_channel(ChannelKind::Unreliable).unwrap();

        assert_eq!(first, ChannelHandle(0));
        assert_eq!(second, ChannelHandle(1));
        assert_eq!(settings.channel_kind(second), Some(ChannelKind::Unreliable));
        assert!(matches!(
            settings.check_channel(ChannelHandle(2)),
            Err(TransportError::UnknownChannel(ChannelHandle(2)))
        ));
    }

    #[test]
    fn test_settings_channel_limit() {
        let mut settings = TransportSettings::default();
        for _ in 0..MAX_CHANNELS {
            settings.add_channel(ChannelKind::Reliable).unwrap();
        }
        assert!(matches!(
            settings.add_channel(ChannelKind::Reliable),
            Err(TransportError::TooManyChannels { max: MAX_CHANNELS })
        ));
    }

    #[test]
    fn test_default_listen_host() {
        let settings = TransportSettings::default();
        assert_eq!(
            settings.listen_hosts,
            vec![ListenHost::new("UDP Socket", 7777)]
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = SessionConfiguration::default();
        config.max_connections = 8;
        config.connect_port = 9100;
        config.client_connection_buffer_timeout = 3;

        let settings = TransportSettings::from_config(&config);
        assert_eq!(settings.max_connections, 8);
        assert_eq!(settings.connection_timeout, Duration::from_secs(3));
        assert_eq!(settings.listen_hosts[0].port, 9100);
        assert!(settings.channels.is_empty());
    }
}
