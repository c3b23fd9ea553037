//! In-memory transport for testing and single-process sessions
//!
//! A [`MemoryNetwork`] is a shared hub standing in for the network. Every
//! [`MemoryTransport`] created from it is one endpoint. Listen hosts are
//! keyed by port only; the address passed to `connect` is ignored.
//! Outbound connections of an endpoint share one host and are numbered
//! from 1, skipping ids that are still in use.
//!
//! The backend is synchronous and deterministic: a send is visible to the
//! receiving endpoint's next `poll_receive`, and events are delivered in
//! the order they were produced.
//!
//! # Example
//!
//! ```
//! use tickwire_protocol::channel::ChannelKind;
//! use tickwire_protocol::transport::{EventKind, Transport};
//! use tickwire_transport::memory::MemoryNetwork;
//!
//! let network = MemoryNetwork::new();
//! let mut server = network.endpoint();
//! let mut client = network.endpoint();
//!
//! let mut settings = server.settings();
//! let channel = settings.add_channel(ChannelKind::Reliable).unwrap();
//! server.register_listen_socket(&settings, Box::new(|| {})).unwrap();
//! let peer = client.connect("127.0.0.1", 7777, &settings, Box::new(|| {})).unwrap();
//!
//! let mut buffer = [0u8; 64];
//! assert_eq!(client.poll_receive(&mut buffer).unwrap().kind, EventKind::Connect);
//! client.send(peer, b"hello", channel, true).unwrap();
//!
//! assert_eq!(server.poll_receive(&mut buffer).unwrap().kind, EventKind::Connect);
//! let event = server.poll_receive(&mut buffer).unwrap();
//! assert_eq!(&buffer[..event.received], b"hello");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tickwire_protocol::channel::ChannelKind;
use tickwire_protocol::error::{TransportError, TransportResult as Result};
use tickwire_protocol::identity::ConnectionIdentity;
use tickwire_protocol::state::ConnectionTable;
use tickwire_protocol::transport::{
    ChannelHandle, EventKind, NativeError, NativeEvent, NativeEventKind, NetEvent, OnComplete,
    Transport, TransportSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Address {
    endpoint: usize,
    host_id: u8,
    connection_id: u16,
}

#[derive(Debug)]
struct HostSlot {
    max_connections: u16,
    next_connection_id: u16,
    open: usize,
}

#[derive(Debug, Default)]
struct EndpointSlot {
    inbox: VecDeque<NativeEvent>,
    hosts: Vec<HostSlot>,
}

#[derive(Debug)]
struct Hub {
    started: Instant,
    rtt_ms: u32,
    endpoints: Vec<EndpointSlot>,
    listeners: HashMap<u16, (usize, u8)>,
    links: HashMap<Address, Address>,
}

impl Hub {
    fn add_host(&mut self, endpoint: usize, max_connections: u16) -> Result<u8> {
        let hosts = &mut self.endpoints[endpoint].hosts;
        let host_id = u8::try_from(hosts.len())
            .map_err(|_| TransportError::from(NativeError::NoResources))?;
        hosts.push(HostSlot {
            max_connections,
            next_connection_id: 1,
            open: 0,
        });
        Ok(host_id)
    }

    /// Picks the next connection id of a host that has no link and that
    /// `in_use` does not claim
    fn allocate_connection_id(
        &mut self,
        endpoint: usize,
        host_id: u8,
        in_use: impl Fn(u16) -> bool,
    ) -> Option<u16> {
        let host = self
            .endpoints
            .get_mut(endpoint)?
            .hosts
            .get_mut(host_id as usize)?;
        for _ in 0..u16::MAX {
            let connection_id = host.next_connection_id;
            host.next_connection_id = connection_id.wrapping_add(1).max(1);
            let address = Address {
                endpoint,
                host_id,
                connection_id,
            };
            if !self.links.contains_key(&address) && !in_use(connection_id) {
                return Some(connection_id);
            }
        }
        None
    }

    fn host_mut(&mut self, endpoint: usize, host_id: u8) -> Option<&mut HostSlot> {
        self.endpoints
            .get_mut(endpoint)?
            .hosts
            .get_mut(host_id as usize)
    }

    fn push(&mut self, endpoint: usize, event: NativeEvent) {
        if let Some(slot) = self.endpoints.get_mut(endpoint) {
            slot.inbox.push_back(event);
        }
    }

    /// Removes both directions of a link and frees the connection slots
    fn sever(&mut self, local: Address) -> Option<Address> {
        let remote = self.links.remove(&local)?;
        self.links.remove(&remote);
        for address in [local, remote] {
            if let Some(host) = self.host_mut(address.endpoint, address.host_id) {
                host.open = host.open.saturating_sub(1);
            }
        }
        Some(remote)
    }

    fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
}

/// Shared in-process network
///
/// Cloning yields another handle to the same network.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_rtt(Duration::ZERO)
    }

    /// Creates a network reporting `rtt` as every connection's round trip time
    pub fn with_rtt(rtt: Duration) -> Self {
        let hub = Hub {
            started: Instant::now(),
            rtt_ms: rtt.as_millis() as u32,
            endpoints: Vec::new(),
            listeners: HashMap::new(),
            links: HashMap::new(),
        };
        Self {
            hub: Arc::new(Mutex::new(hub)),
        }
    }

    /// Creates a new endpoint attached to this network
    pub fn endpoint(&self) -> MemoryTransport {
        let endpoint = {
            let mut hub = self.lock();
            hub.endpoints.push(EndpointSlot::default());
            hub.endpoints.len() - 1
        };
        MemoryTransport {
            network: self.clone(),
            endpoint,
            channels: Vec::new(),
            table: ConnectionTable::new(),
            queued: HashMap::new(),
            server: None,
            outbound: None,
            shut_down: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint of a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: usize,
    channels: Vec<ChannelKind>,
    table: ConnectionTable,
    queued: HashMap<ConnectionIdentity, Vec<(ChannelHandle, Bytes)>>,
    server: Option<ConnectionIdentity>,
    /// Host shared by all outbound connections, created on first connect
    outbound: Option<u8>,
    shut_down: bool,
}

impl MemoryTransport {
    fn address(&self, peer: ConnectionIdentity) -> Option<Address> {
        peer.remote_parts().map(|(host_id, connection_id)| Address {
            endpoint: self.endpoint,
            host_id,
            connection_id,
        })
    }

    fn deliver(&self, peer: ConnectionIdentity, channel: ChannelHandle, payload: Bytes) {
        let Some(local) = self.address(peer) else {
            return;
        };
        let mut hub = self.network.lock();
        if let Some(remote) = hub.links.get(&local).copied() {
            tracing::debug!(peer = %peer, channel = %channel, len = payload.len(), "Delivering payload");
            hub.push(
                remote.endpoint,
                NativeEvent::data(remote.host_id, remote.connection_id, channel, payload),
            );
        }
    }

    /// Simulates the backend losing a peer: both sides observe a native
    /// timeout, which surfaces as Disconnect
    pub fn inject_timeout(&mut self, peer: ConnectionIdentity) {
        let Some(local) = self.address(peer) else {
            return;
        };
        self.queued.remove(&peer);
        let mut hub = self.network.lock();
        if let Some(remote) = hub.sever(local) {
            hub.push(
                local.endpoint,
                NativeEvent::timeout(local.host_id, local.connection_id),
            );
            hub.push(
                remote.endpoint,
                NativeEvent::timeout(remote.host_id, remote.connection_id),
            );
        }
    }

    /// Queues a discovery broadcast on this endpoint
    pub fn inject_broadcast(&mut self) {
        self.network
            .lock()
            .push(self.endpoint, NativeEvent::new(NativeEventKind::Broadcast, 0, 0));
    }

    /// Number of native events waiting to be polled
    pub fn pending_events(&self) -> usize {
        self.network
            .lock()
            .endpoints
            .get(self.endpoint)
            .map(|slot| slot.inbox.len())
            .unwrap_or(0)
    }

    /// Number of payloads queued for a peer
    pub fn queued_len(&self, peer: ConnectionIdentity) -> usize {
        self.queued.get(&peer).map(Vec::len).unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn settings(&self) -> TransportSettings {
        TransportSettings::default()
    }

    fn connect(
        &mut self,
        address: &str,
        port: u16,
        settings: &TransportSettings,
        on_complete: OnComplete,
    ) -> Result<ConnectionIdentity> {
        if self.shut_down {
            return Err(TransportError::ShutDown);
        }
        self.channels = settings.channels.clone();

        let mut hub = self.network.lock();
        let host_id = match self.outbound {
            Some(host_id) => host_id,
            None => {
                let host_id = hub.add_host(self.endpoint, u16::MAX)?;
                self.outbound = Some(host_id);
                host_id
            }
        };
        let table = &self.table;
        let connection_id = hub
            .allocate_connection_id(self.endpoint, host_id, |connection_id| {
                !table
                    .state(ConnectionIdentity::remote(host_id, connection_id))
                    .is_disconnected()
            })
            .ok_or(TransportError::from(NativeError::NoResources))?;
        let local = Address {
            endpoint: self.endpoint,
            host_id,
            connection_id,
        };
        let identity = ConnectionIdentity::remote(host_id, connection_id);
        self.table.mark_connecting(identity)?;

        let listener = hub.listeners.get(&port).copied();
        match listener {
            None => {
                tracing::debug!(address, port, "No memory listener on port");
                hub.push(
                    self.endpoint,
                    NativeEvent::new(NativeEventKind::Disconnect, host_id, connection_id)
                        .with_error(NativeError::Timeout),
                );
            }
            Some((endpoint, remote_host)) => {
                let has_room = hub
                    .host_mut(endpoint, remote_host)
                    .is_some_and(|host| host.open < host.max_connections as usize);
                let accepted = if has_room {
                    hub.allocate_connection_id(endpoint, remote_host, |_| false)
                } else {
                    None
                };

                match accepted {
                    Some(accepted_id) => {
                        let remote = Address {
                            endpoint,
                            host_id: remote_host,
                            connection_id: accepted_id,
                        };
                        for (owner, slot) in [(self.endpoint, host_id), (endpoint, remote_host)] {
                            if let Some(host) = hub.host_mut(owner, slot) {
                                host.open += 1;
                            }
                        }
                        hub.links.insert(local, remote);
                        hub.links.insert(remote, local);
                        hub.push(
                            self.endpoint,
                            NativeEvent::new(NativeEventKind::Connect, host_id, connection_id),
                        );
                        hub.push(
                            endpoint,
                            NativeEvent::new(NativeEventKind::Connect, remote_host, accepted_id),
                        );
                    }
                    None => {
                        tracing::warn!(port, "Memory listener refused connection");
                        hub.push(
                            self.endpoint,
                            NativeEvent::new(NativeEventKind::Disconnect, host_id, connection_id)
                                .with_error(NativeError::NoResources),
                        );
                    }
                }
            }
        }
        drop(hub);

        tracing::info!(address, port, peer = %identity, "Connecting");
        self.server = Some(identity);
        on_complete();
        Ok(identity)
    }

    fn register_listen_socket(
        &mut self,
        settings: &TransportSettings,
        on_ready: OnComplete,
    ) -> Result<()> {
        if self.shut_down {
            return Err(TransportError::ShutDown);
        }
        self.channels = settings.channels.clone();

        let mut hub = self.network.lock();
        // nothing is bound unless every port is free
        let mut ports = HashSet::new();
        for listen_host in &settings.listen_hosts {
            if hub.listeners.contains_key(&listen_host.port) || !ports.insert(listen_host.port) {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("memory port {} is already bound", listen_host.port),
                )
                .into());
            }
        }
        for listen_host in &settings.listen_hosts {
            let host_id = hub.add_host(self.endpoint, settings.max_connections)?;
            hub.listeners
                .insert(listen_host.port, (self.endpoint, host_id));
            tracing::info!(name = %listen_host.name, port = listen_host.port, host_id, "Listening");
        }
        drop(hub);

        on_ready();
        Ok(())
    }

    fn disconnect_client(&mut self, peer: ConnectionIdentity) {
        let Some(local) = self.address(peer) else {
            return;
        };
        if self.table.remove(peer).is_disconnected() {
            return;
        }
        self.queued.remove(&peer);
        if self.server == Some(peer) {
            self.server = None;
        }

        let mut hub = self.network.lock();
        if let Some(remote) = hub.sever(local) {
            hub.push(
                remote.endpoint,
                NativeEvent::new(NativeEventKind::Disconnect, remote.host_id, remote.connection_id),
            );
        }
        tracing::info!(peer = %peer, "Disconnected peer");
    }

    fn disconnect_self(&mut self) {
        if let Some(server) = self.server.take() {
            self.disconnect_client(server);
        }
    }

    fn poll_receive(&mut self, buffer: &mut [u8]) -> Result<NetEvent> {
        if self.shut_down {
            return Ok(NetEvent::nothing());
        }
        loop {
            let next = self
                .network
                .lock()
                .endpoints
                .get_mut(self.endpoint)
                .and_then(|slot| slot.inbox.pop_front());
            let Some(native) = next else {
                return Ok(NetEvent::nothing());
            };
            if let Some(event) = self.table.accept_native(native, buffer)? {
                if event.kind == EventKind::Disconnect {
                    self.queued.remove(&event.peer);
                    if self.server == Some(event.peer) {
                        self.server = None;
                    }
                }
                return Ok(event);
            }
        }
    }

    fn send(
        &mut self,
        peer: ConnectionIdentity,
        payload: &[u8],
        channel: ChannelHandle,
        immediate: bool,
    ) -> Result<()> {
        if self.shut_down || !self.table.can_send(peer) {
            return Ok(());
        }
        if channel.index() >= self.channels.len() {
            return Err(TransportError::UnknownChannel(channel));
        }

        let payload = Bytes::copy_from_slice(payload);
        if immediate {
            self.deliver(peer, channel, payload);
        } else {
            self.queued.entry(peer).or_default().push((channel, payload));
        }
        Ok(())
    }

    fn flush_queued(&mut self, peer: ConnectionIdentity) -> Result<()> {
        let Some(queued) = self.queued.remove(&peer) else {
            return Ok(());
        };
        for (channel, payload) in queued {
            self.deliver(peer, channel, payload);
        }
        Ok(())
    }

    fn current_rtt(&self, peer: ConnectionIdentity) -> Result<u32> {
        if !peer.is_remote() {
            return Ok(0);
        }
        if !self.table.can_send(peer) {
            return Err(NativeError::WrongConnection.into());
        }
        Ok(self.network.lock().rtt_ms)
    }

    fn network_timestamp(&self) -> u32 {
        self.network.lock().now_ms()
    }

    fn remote_delay(&self, peer: ConnectionIdentity, remote_timestamp: u32) -> Result<u32> {
        if !peer.is_remote() {
            return Ok(0);
        }
        if !self.table.can_send(peer) {
            return Err(NativeError::WrongConnection.into());
        }
        // endpoints share one clock
        Ok(self.network.lock().now_ms().saturating_sub(remote_timestamp))
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        let mut hub = self.network.lock();
        let endpoint = self.endpoint;
        // covers links whose Connect has not been polled yet
        let owned: Vec<Address> = hub
            .links
            .keys()
            .filter(|address| address.endpoint == endpoint)
            .copied()
            .collect();
        for local in owned {
            if let Some(remote) = hub.sever(local) {
                hub.push(
                    remote.endpoint,
                    NativeEvent::new(NativeEventKind::Disconnect, remote.host_id, remote.connection_id),
                );
            }
        }
        hub.listeners.retain(|_, (owner, _)| *owner != endpoint);
        if let Some(slot) = hub.endpoints.get_mut(endpoint) {
            slot.inbox.clear();
        }
        drop(hub);

        self.table.clear();
        self.queued.clear();
        self.server = None;
        self.shut_down = true;
        tracing::info!(endpoint, "Memory transport shut down");
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
