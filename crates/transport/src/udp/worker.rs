//! Per-host socket task
//!
//! A worker owns one bound `UdpSocket` and the connections of one host. It
//! runs on the caller's tokio runtime and talks to the poll side through
//! two unbounded channels: commands in, [`WorkerEvent`]s out. All workers of
//! a transport share the event channel, so the poll side sees one linear
//! order of effects.
//!
//! Hostnames are resolved by a helper task so the worker keeps serving its
//! other connections meanwhile.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tickwire_protocol::transport::{ChannelHandle, NativeError, NativeEvent, NativeEventKind};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::packet::{Packet, MAX_DATAGRAM_SIZE};

const MIN_TICK: Duration = Duration::from_millis(10);

/// Where an outbound connection goes
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Addr(SocketAddr),
    /// Resolved by the worker
    Host(String, u16),
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        connection_id: u16,
        target: Target,
        /// Channels registered for this connection
        channels: usize,
    },
    Send {
        connection_id: u16,
        channel: ChannelHandle,
        payload: Bytes,
    },
    Disconnect {
        connection_id: u16,
    },
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Native(NativeEvent),
    RttSample {
        host_id: u8,
        connection_id: u16,
        rtt_ms: u32,
        /// Remote clock minus local clock
        offset_ms: i64,
    },
}

#[derive(Debug)]
struct Resolved {
    connection_id: u16,
    channels: usize,
    addr: Option<SocketAddr>,
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    /// Id the remote side assigned; unknown until the handshake completes
    remote_id: Option<u16>,
    connected: bool,
    last_heard: Instant,
    /// Data on a channel at or past this count is dropped
    channels: usize,
}

/// Static parameters of one worker
#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub host_id: u8,
    pub accepting: bool,
    pub max_connections: u16,
    /// Channel count of accepted connections
    pub channels: usize,
    pub timeout: Duration,
    pub ping_interval: Duration,
    pub clock: Instant,
}

pub(crate) struct Worker {
    config: WorkerConfig,
    socket: UdpSocket,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    peers: HashMap<u16, Peer>,
    /// Accepted connections keyed by remote address and the remote's id
    by_remote: HashMap<(SocketAddr, u16), u16>,
    /// Outbound connections waiting for name resolution
    resolving: HashMap<u16, usize>,
    resolved_tx: mpsc::UnboundedSender<Resolved>,
    resolved_rx: mpsc::UnboundedReceiver<Resolved>,
    next_connection_id: u16,
}

impl Worker {
    pub(crate) fn new(
        config: WorkerConfig,
        socket: UdpSocket,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        Self {
            config,
            socket,
            commands,
            events,
            peers: HashMap::new(),
            by_remote: HashMap::new(),
            resolving: HashMap::new(),
            resolved_tx,
            resolved_rx,
            next_connection_id: 1,
        }
    }

    fn now_ms(&self) -> u32 {
        self.config.clock.elapsed().as_millis() as u32
    }

    fn emit(&self, event: WorkerEvent) {
        // the transport has been dropped; nothing left to notify
        let _ = self.events.send(event);
    }

    fn emit_native(&self, kind: NativeEventKind, connection_id: u16) {
        self.emit(WorkerEvent::Native(NativeEvent::new(
            kind,
            self.config.host_id,
            connection_id,
        )));
    }

    async fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        let bytes = packet.to_bytes();
        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            tracing::warn!(host_id = self.config.host_id, %addr, error = %e, "Failed to send datagram");
        }
    }

    /// Looks up a connection and checks that the datagram came from its peer
    fn peer_mut(&mut self, connection_id: u16, addr: SocketAddr) -> Option<&mut Peer> {
        self.peers
            .get_mut(&connection_id)
            .filter(|peer| peer.addr == addr)
    }

    fn remove_peer(&mut self, connection_id: u16) -> Option<Peer> {
        let peer = self.peers.remove(&connection_id)?;
        if let Some(remote_id) = peer.remote_id {
            if self.by_remote.get(&(peer.addr, remote_id)) == Some(&connection_id) {
                self.by_remote.remove(&(peer.addr, remote_id));
            }
        }
        Some(peer)
    }

    fn allocate_id(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX {
            let id = self.next_connection_id;
            self.next_connection_id = self.next_connection_id.wrapping_add(1).max(1);
            if !self.peers.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Runs until a Shutdown command arrives or the transport is dropped
    pub(crate) async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut tick = tokio::time::interval(self.config.ping_interval.max(MIN_TICK));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!(host_id = self.config.host_id, "UDP worker started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => {
                            self.close_all().await;
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                    }
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            let datagram = Bytes::copy_from_slice(&buf[..len]);
                            self.handle_datagram(datagram, addr).await;
                        }
                        Err(e) => {
                            tracing::warn!(host_id = self.config.host_id, error = %e, "UDP receive failed");
                        }
                    }
                }

                Some(resolved) = self.resolved_rx.recv() => self.on_resolved(resolved).await,

                _ = tick.tick() => self.on_tick().await,
            }
        }

        tracing::debug!(host_id = self.config.host_id, "UDP worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                connection_id,
                target: Target::Addr(addr),
                channels,
            } => self.start_connect(connection_id, addr, channels).await,
            Command::Connect {
                connection_id,
                target: Target::Host(name, port),
                channels,
            } => {
                self.resolving.insert(connection_id, channels);
                let ipv6 = self
                    .socket
                    .local_addr()
                    .map(|local| local.is_ipv6())
                    .unwrap_or(false);
                let resolved = self.resolved_tx.clone();
                tokio::spawn(async move {
                    let addr = match tokio::net::lookup_host((name.as_str(), port)).await {
                        Ok(mut addrs) => addrs.find(|addr| addr.is_ipv6() == ipv6),
                        Err(e) => {
                            tracing::warn!(name = %name, error = %e, "Could not resolve address");
                            None
                        }
                    };
                    // the worker has stopped; nobody waits for the answer
                    let _ = resolved.send(Resolved {
                        connection_id,
                        channels,
                        addr,
                    });
                });
            }
            Command::Send {
                connection_id,
                channel,
                payload,
            } => {
                let target = self
                    .peers
                    .get(&connection_id)
                    .filter(|peer| peer.connected)
                    .and_then(|peer| peer.remote_id.map(|remote_id| (peer.addr, remote_id)));
                if let Some((addr, receiver)) = target {
                    tracing::debug!(host_id = self.config.host_id, connection_id, channel = %channel, len = payload.len(), "Sending datagram");
                    self.send_packet(
                        Packet::Data {
                            receiver,
                            channel,
                            payload,
                        },
                        addr,
                    )
                    .await;
                }
            }
            Command::Disconnect { connection_id } => {
                self.resolving.remove(&connection_id);
                if let Some(peer) = self.remove_peer(connection_id) {
                    if let Some(receiver) = peer.remote_id {
                        self.send_packet(Packet::Disconnect { receiver }, peer.addr)
                            .await;
                    }
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn start_connect(&mut self, connection_id: u16, addr: SocketAddr, channels: usize) {
        self.peers.insert(
            connection_id,
            Peer {
                addr,
                remote_id: None,
                connected: false,
                last_heard: Instant::now(),
                channels,
            },
        );
        let timestamp = self.now_ms();
        self.send_packet(
            Packet::Connect {
                sender: connection_id,
                timestamp,
            },
            addr,
        )
        .await;
    }

    async fn on_resolved(&mut self, resolved: Resolved) {
        // disconnected while resolving
        if self.resolving.remove(&resolved.connection_id).is_none() {
            return;
        }
        match resolved.addr {
            Some(addr) => {
                self.start_connect(resolved.connection_id, addr, resolved.channels)
                    .await
            }
            None => self.emit(WorkerEvent::Native(
                NativeEvent::new(
                    NativeEventKind::Disconnect,
                    self.config.host_id,
                    resolved.connection_id,
                )
                .with_error(NativeError::WrongHost),
            )),
        }
    }

    async fn handle_datagram(&mut self, datagram: Bytes, addr: SocketAddr) {
        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(host_id = self.config.host_id, %addr, error = %e, "Dropping ill-formed datagram");
                return;
            }
        };

        match packet {
            Packet::Connect { sender, .. } => self.on_connect(sender, addr).await,
            Packet::Accept {
                sender, receiver, ..
            } => {
                let Some(peer) = self.peer_mut(receiver, addr) else {
                    return;
                };
                peer.last_heard = Instant::now();
                if peer.connected {
                    return;
                }
                peer.connected = true;
                peer.remote_id = Some(sender);
                self.emit_native(NativeEventKind::Connect, receiver);
            }
            Packet::Data {
                receiver,
                channel,
                payload,
            } => {
                let host_id = self.config.host_id;
                let channels = match self.peer_mut(receiver, addr) {
                    Some(peer) if peer.connected => {
                        peer.last_heard = Instant::now();
                        Some(peer.channels)
                    }
                    _ => None,
                };
                match channels {
                    Some(channels) if channel.index() < channels => {
                        self.emit(WorkerEvent::Native(NativeEvent::data(
                            host_id, receiver, channel, payload,
                        )));
                    }
                    Some(_) => {
                        tracing::warn!(host_id, %addr, receiver, channel = %channel, "Dropping data on unregistered channel");
                    }
                    None => {
                        tracing::debug!(host_id, %addr, receiver, "Dropping data for unknown connection");
                    }
                }
            }
            Packet::Disconnect { receiver } => {
                if self.peer_mut(receiver, addr).is_some() {
                    self.remove_peer(receiver);
                    self.emit_native(NativeEventKind::Disconnect, receiver);
                }
            }
            Packet::Ping {
                receiver,
                timestamp,
            } => {
                let Some(peer) = self.peer_mut(receiver, addr) else {
                    return;
                };
                peer.last_heard = Instant::now();
                if let Some(remote_id) = peer.remote_id {
                    let pong = Packet::Pong {
                        receiver: remote_id,
                        echo: timestamp,
                        timestamp: self.now_ms(),
                    };
                    self.send_packet(pong, addr).await;
                }
            }
            Packet::Pong {
                receiver,
                echo,
                timestamp,
            } => {
                let now = self.now_ms();
                let Some(peer) = self.peer_mut(receiver, addr) else {
                    return;
                };
                peer.last_heard = Instant::now();
                let rtt_ms = now.wrapping_sub(echo);
                let offset_ms = timestamp as i64 - (echo as i64 + (rtt_ms / 2) as i64);
                self.emit(WorkerEvent::RttSample {
                    host_id: self.config.host_id,
                    connection_id: receiver,
                    rtt_ms,
                    offset_ms,
                });
            }
        }
    }

    async fn on_connect(&mut self, sender: u16, addr: SocketAddr) {
        if !self.config.accepting {
            tracing::debug!(host_id = self.config.host_id, %addr, "Ignoring connect on outbound host");
            return;
        }

        // a retransmitted Connect gets the same answer again
        if let Some(&id) = self.by_remote.get(&(addr, sender)) {
            let timestamp = self.now_ms();
            self.send_packet(
                Packet::Accept {
                    sender: id,
                    receiver: sender,
                    timestamp,
                },
                addr,
            )
            .await;
            return;
        }

        if self.peers.len() >= self.config.max_connections as usize {
            tracing::warn!(host_id = self.config.host_id, %addr, "Refusing connection: host is full");
            self.send_packet(Packet::Disconnect { receiver: sender }, addr)
                .await;
            return;
        }

        let Some(id) = self.allocate_id() else {
            self.send_packet(Packet::Disconnect { receiver: sender }, addr)
                .await;
            return;
        };

        self.peers.insert(
            id,
            Peer {
                addr,
                remote_id: Some(sender),
                connected: true,
                last_heard: Instant::now(),
                channels: self.config.channels,
            },
        );
        self.by_remote.insert((addr, sender), id);

        let timestamp = self.now_ms();
        self.send_packet(
            Packet::Accept {
                sender: id,
                receiver: sender,
                timestamp,
            },
            addr,
        )
        .await;

        tracing::info!(host_id = self.config.host_id, connection_id = id, %addr, "Accepted connection");
        self.emit_native(NativeEventKind::Connect, id);
    }

    async fn on_tick(&mut self) {
        let timed_out: Vec<u16> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.last_heard.elapsed() > self.config.timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in timed_out {
            if let Some(peer) = self.remove_peer(id) {
                tracing::info!(host_id = self.config.host_id, connection_id = id, addr = %peer.addr, "Connection timed out");
            }
            self.emit(WorkerEvent::Native(NativeEvent::timeout(
                self.config.host_id,
                id,
            )));
        }

        let now = self.now_ms();
        let outgoing: Vec<(Packet, SocketAddr)> = self
            .peers
            .iter()
            .map(|(id, peer)| match (peer.connected, peer.remote_id) {
                (true, Some(receiver)) => (
                    Packet::Ping {
                        receiver,
                        timestamp: now,
                    },
                    peer.addr,
                ),
                // handshake still pending
                _ => (
                    Packet::Connect {
                        sender: *id,
                        timestamp: now,
                    },
                    peer.addr,
                ),
            })
            .collect();

        for (packet, addr) in outgoing {
            self.send_packet(packet, addr).await;
        }
    }

    async fn close_all(&mut self) {
        let peers: Vec<Peer> = self.peers.drain().map(|(_, peer)| peer).collect();
        self.by_remote.clear();
        self.resolving.clear();
        for peer in peers {
            if let Some(receiver) = peer.remote_id {
                self.send_packet(Packet::Disconnect { receiver }, peer.addr)
                    .await;
            }
        }
    }
}
