//! Reference UDP backend
//!
//! Each host is a bound `tokio::net::UdpSocket` owned by a [`worker`] task
//! on a caller-supplied runtime. Every listen host gets one; outbound
//! connections share one host per address family, created on the first
//! connect and using that connect's timing settings.
//!
//! The [`UdpTransport`] itself is synchronous: commands are handed to
//! workers through unbounded channels and events are drained with
//! `try_recv` from `poll_receive`, so the poll loop never blocks. Numeric
//! addresses are parsed in place; hostnames are resolved by the worker and
//! a failed lookup surfaces as a Disconnect.
//!
//! Workers handle the handshake, keepalive pings, RTT and clock offset
//! samples, timeouts (reported as a native Timeout) and the per-host
//! connection limit.

pub mod packet;
mod worker;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use bytes::Bytes;
use tickwire_protocol::channel::ChannelKind;
use tickwire_protocol::error::{TransportError, TransportResult as Result};
use tickwire_protocol::identity::ConnectionIdentity;
use tickwire_protocol::state::ConnectionTable;
use tickwire_protocol::transport::{
    ChannelHandle, EventKind, NativeError, NetEvent, OnComplete, Transport, TransportSettings,
};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use self::packet::MAX_PAYLOAD_SIZE;
use self::worker::{Command, Target, Worker, WorkerConfig, WorkerEvent};

#[derive(Debug)]
struct HostHandle {
    name: String,
    local_addr: SocketAddr,
    commands: mpsc::UnboundedSender<Command>,
    _task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PeerStats {
    rtt_ms: Option<u32>,
    offset_ms: i64,
}

/// UDP implementation of [`Transport`]
#[derive(Debug)]
pub struct UdpTransport {
    runtime: Handle,
    clock: Instant,
    hosts: Vec<HostHandle>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    table: ConnectionTable,
    channels: Vec<ChannelKind>,
    queued: HashMap<ConnectionIdentity, Vec<(ChannelHandle, Bytes)>>,
    stats: HashMap<ConnectionIdentity, PeerStats>,
    server: Option<ConnectionIdentity>,
    outbound_v4: Option<u8>,
    outbound_v6: Option<u8>,
    next_outbound_id: u16,
    shut_down: bool,
}

impl UdpTransport {
    /// Creates a transport whose workers run on `runtime`
    pub fn new(runtime: Handle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            clock: Instant::now(),
            hosts: Vec::new(),
            events_tx,
            events_rx,
            table: ConnectionTable::new(),
            channels: Vec::new(),
            queued: HashMap::new(),
            stats: HashMap::new(),
            server: None,
            outbound_v4: None,
            outbound_v6: None,
            next_outbound_id: 1,
            shut_down: false,
        }
    }

    /// Address a host's socket is bound to
    pub fn local_addr(&self, host_id: u8) -> Option<SocketAddr> {
        self.hosts.get(host_id as usize).map(|host| host.local_addr)
    }

    /// Name of a host (the listen host name, or `"outbound"`)
    pub fn host_name(&self, host_id: u8) -> Option<&str> {
        self.hosts.get(host_id as usize).map(|host| host.name.as_str())
    }

    fn spawn_host(
        &mut self,
        name: &str,
        bind: SocketAddr,
        accepting: bool,
        settings: &TransportSettings,
    ) -> Result<u8> {
        let host_id =
            u8::try_from(self.hosts.len()).map_err(|_| TransportError::from(NativeError::NoResources))?;

        let std_socket = std::net::UdpSocket::bind(bind)?;
        std_socket.set_nonblocking(true)?;
        let local_addr = std_socket.local_addr()?;
        let socket = {
            let _guard = self.runtime.enter();
            UdpSocket::from_std(std_socket)?
        };

        let config = WorkerConfig {
            host_id,
            accepting,
            max_connections: if accepting { settings.max_connections } else { u16::MAX },
            channels: settings.channels.len(),
            timeout: settings.connection_timeout,
            ping_interval: settings.ping_interval,
            clock: self.clock,
        };
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(config, socket, commands_rx, self.events_tx.clone());
        let task = self.runtime.spawn(worker.run());

        self.hosts.push(HostHandle {
            name: name.to_string(),
            local_addr,
            commands,
            _task: task,
        });
        Ok(host_id)
    }

    /// Returns the outbound host of an address family, spawning it on first use
    fn outbound_host(&mut self, ipv6: bool, settings: &TransportSettings) -> Result<u8> {
        let existing = if ipv6 { self.outbound_v6 } else { self.outbound_v4 };
        if let Some(host_id) = existing {
            return Ok(host_id);
        }
        let bind = if ipv6 {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        };
        let host_id = self.spawn_host("outbound", bind, false, settings)?;
        if ipv6 {
            self.outbound_v6 = Some(host_id);
        } else {
            self.outbound_v4 = Some(host_id);
        }
        Ok(host_id)
    }

    /// Next outbound connection id not held by a live connection
    fn allocate_outbound_id(&mut self, host_id: u8) -> Result<u16> {
        for _ in 0..u16::MAX {
            let connection_id = self.next_outbound_id;
            self.next_outbound_id = connection_id.wrapping_add(1).max(1);
            let peer = ConnectionIdentity::remote(host_id, connection_id);
            if self.table.state(peer).is_disconnected() {
                return Ok(connection_id);
            }
        }
        Err(NativeError::NoResources.into())
    }

    fn command(&self, host_id: u8, command: Command) -> Result<()> {
        let host = self
            .hosts
            .get(host_id as usize)
            .ok_or(TransportError::from(NativeError::WrongHost))?;
        host.commands
            .send(command)
            .map_err(|_| TransportError::ShutDown)
    }

    fn deliver(&self, peer: ConnectionIdentity, channel: ChannelHandle, payload: Bytes) -> Result<()> {
        let Some((host_id, connection_id)) = peer.remote_parts() else {
            return Ok(());
        };
        self.command(
            host_id,
            Command::Send {
                connection_id,
                channel,
                payload,
            },
        )
    }

    fn forget(&mut self, peer: ConnectionIdentity) {
        self.queued.remove(&peer);
        self.stats.remove(&peer);
        if self.server == Some(peer) {
            self.server = None;
        }
    }

    fn connected_stats(&self, peer: ConnectionIdentity) -> Result<PeerStats> {
        if !self.table.can_send(peer) {
            return Err(NativeError::WrongConnection.into());
        }
        Ok(self.stats.get(&peer).copied().unwrap_or_default())
    }
}

/// Parses numeric addresses in place; anything else is left to the worker
fn parse_target(address: &str, port: u16) -> Result<Target> {
    let address = address.trim();
    if address.is_empty() {
        return Err(TransportError::AddressResolution("empty address".to_string()));
    }
    match address.parse::<IpAddr>() {
        Ok(ip) => Ok(Target::Addr(SocketAddr::new(ip, port))),
        Err(_) => Ok(Target::Host(address.to_string(), port)),
    }
}

impl Transport for UdpTransport {
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
        let target = parse_target(address, port)?;
        self.channels = settings.channels.clone();

        let ipv6 = matches!(target, Target::Addr(addr) if addr.is_ipv6());
        let host_id = self.outbound_host(ipv6, settings)?;
        let connection_id = self.allocate_outbound_id(host_id)?;
        let identity = ConnectionIdentity::remote(host_id, connection_id);
        self.table.mark_connecting(identity)?;
        self.command(
            host_id,
            Command::Connect {
                connection_id,
                target,
                channels: settings.channels.len(),
            },
        )?;

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

        let first_new = self.hosts.len();
        for listen_host in &settings.listen_hosts {
            let bind = SocketAddr::new(settings.listen_address, listen_host.port);
            match self.spawn_host(&listen_host.name, bind, true, settings) {
                Ok(host_id) => {
                    tracing::info!(name = %listen_host.name, addr = ?self.local_addr(host_id), host_id, "Listening");
                }
                Err(e) => {
                    // unbind the hosts of this call
                    for host in self.hosts.drain(first_new..) {
                        let _ = host.commands.send(Command::Shutdown);
                    }
                    tracing::warn!(name = %listen_host.name, %bind, error = %e, "Listen failed");
                    return Err(e);
                }
            }
        }

        on_ready();
        Ok(())
    }

    fn disconnect_client(&mut self, peer: ConnectionIdentity) {
        let Some((host_id, connection_id)) = peer.remote_parts() else {
            return;
        };
        if self.table.remove(peer).is_disconnected() {
            return;
        }
        self.forget(peer);
        if let Err(e) = self.command(host_id, Command::Disconnect { connection_id }) {
            tracing::warn!(peer = %peer, error = %e, "Failed to disconnect peer");
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
            let Ok(event) = self.events_rx.try_recv() else {
                return Ok(NetEvent::nothing());
            };
            match event {
                WorkerEvent::Native(native) => {
                    if let Some(event) = self.table.accept_native(native, buffer)? {
                        if event.kind == EventKind::Disconnect {
                            self.forget(event.peer);
                        }
                        return Ok(event);
                    }
                }
                WorkerEvent::RttSample {
                    host_id,
                    connection_id,
                    rtt_ms,
                    offset_ms,
                } => {
                    let peer = ConnectionIdentity::remote(host_id, connection_id);
                    if !self.table.can_send(peer) {
                        continue;
                    }
                    let stats = self.stats.entry(peer).or_default();
                    stats.rtt_ms = Some(match stats.rtt_ms {
                        Some(smoothed) => (smoothed * 7 + rtt_ms) / 8,
                        None => rtt_ms,
                    });
                    stats.offset_ms = offset_ms;
                }
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
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NativeError::MessageTooLong.into());
        }

        let payload = Bytes::copy_from_slice(payload);
        if immediate {
            self.deliver(peer, channel, payload)
        } else {
            self.queued.entry(peer).or_default().push((channel, payload));
            Ok(())
        }
    }

    fn flush_queued(&mut self, peer: ConnectionIdentity) -> Result<()> {
        let Some(queued) = self.queued.remove(&peer) else {
            return Ok(());
        };
        for (channel, payload) in queued {
            self.deliver(peer, channel, payload)?;
        }
        Ok(())
    }

    fn current_rtt(&self, peer: ConnectionIdentity) -> Result<u32> {
        if !peer.is_remote() {
            return Ok(0);
        }
        Ok(self.connected_stats(peer)?.rtt_ms.unwrap_or(0))
    }

    fn network_timestamp(&self) -> u32 {
        self.clock.elapsed().as_millis() as u32
    }

    fn remote_delay(&self, peer: ConnectionIdentity, remote_timestamp: u32) -> Result<u32> {
        if !peer.is_remote() {
            return Ok(0);
        }
        let stats = self.connected_stats(peer)?;
        let sent_local = remote_timestamp as i64 - stats.offset_ms;
        let delay = self.network_timestamp() as i64 - sent_local;
        Ok(delay.clamp(0, u32::MAX as i64) as u32)
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        for host in &self.hosts {
            // a worker that already stopped has nothing to close
            let _ = host.commands.send(Command::Shutdown);
        }
        self.table.clear();
        self.queued.clear();
        self.stats.clear();
        self.server = None;
        self.shut_down = true;
        tracing::info!(hosts = self.hosts.len(), "UDP transport shut down");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
