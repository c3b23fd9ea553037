//! End-to-end sessions over the in-memory backend

use tickwire::protocol::{
    ChannelKind, ChannelRegistry, ConnectionIdentity, EventKind, NetEvent, SessionConfiguration,
    Transport, TransportError, TransportSettings,
};
use tickwire::transport::{MemoryNetwork, MemoryTransport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("tickwire=debug")
        .try_init();
}

struct Session {
    server: MemoryTransport,
    client: MemoryTransport,
    channels: ChannelRegistry,
    to_server: ConnectionIdentity,
    to_client: ConnectionIdentity,
}

fn start_session(network: &MemoryNetwork, config: &SessionConfiguration) -> Session {
    let mut server = network.endpoint();
    let mut client = network.endpoint();

    let mut settings = TransportSettings::from_config(config);
    let channels = ChannelRegistry::register(config, &mut server, &mut settings).unwrap();
    server
        .register_listen_socket(&settings, Box::new(|| {}))
        .unwrap();
    let to_server = client
        .connect(&config.connect_address, config.connect_port, &settings, Box::new(|| {}))
        .unwrap();

    let mut buffer = [0u8; 256];
    assert_eq!(client.poll_receive(&mut buffer).unwrap(), NetEvent::connect(to_server));
    let accepted = server.poll_receive(&mut buffer).unwrap();
    assert_eq!(accepted.kind, EventKind::Connect);

    Session {
        server,
        client,
        channels,
        to_server,
        to_client: accepted.peer,
    }
}

fn game_config() -> SessionConfiguration {
    SessionConfiguration::default()
        .with_channel("Reliable", ChannelKind::Reliable)
        .with_channel("Fast", ChannelKind::UnreliableSequenced)
}

#[test]
fn test_connect_data_timeout_sequence() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut session = start_session(&network, &game_config());
    let fast = session.channels.handle("Fast").unwrap();

    session
        .client
        .send(session.to_server, b"position", fast, true)
        .unwrap();

    let mut buffer = [0u8; 256];
    let event = session.server.poll_receive(&mut buffer).unwrap();
    assert_eq!(event, NetEvent::data(session.to_client, fast, 8));
    assert_eq!(&buffer[..event.received], b"position");

    session.server.inject_timeout(session.to_client);
    assert_eq!(
        session.server.poll_receive(&mut buffer).unwrap(),
        NetEvent::disconnect(session.to_client)
    );
    assert_eq!(
        session.client.poll_receive(&mut buffer).unwrap(),
        NetEvent::disconnect(session.to_server)
    );
    assert!(session.server.poll_receive(&mut buffer).unwrap().is_nothing());
}

#[test]
fn test_host_and_invalid_sends_never_reach_the_wire() {
    let network = MemoryNetwork::new();
    let mut session = start_session(&network, &game_config());
    let reliable = session.channels.handle("Reliable").unwrap();

    session
        .server
        .send(ConnectionIdentity::Host, b"loopback", reliable, true)
        .unwrap();
    session
        .server
        .send(ConnectionIdentity::Invalid, b"nowhere", reliable, true)
        .unwrap();
    session
        .server
        .send(ConnectionIdentity::Host, b"queued", reliable, false)
        .unwrap();
    session.server.flush_queued(ConnectionIdentity::Host).unwrap();

    assert_eq!(session.client.pending_events(), 0);
    assert_eq!(session.server.queued_len(ConnectionIdentity::Host), 0);
    assert_eq!(session.server.current_rtt(ConnectionIdentity::Host).unwrap(), 0);
}

#[test]
fn test_internal_channel_registered_first() {
    let network = MemoryNetwork::new();
    let mut session = start_session(&network, &game_config());

    let internal = session.channels.internal().unwrap();
    assert_eq!(internal.index(), 0);
    assert_eq!(
        session.channels.kind(internal),
        Some(ChannelKind::ReliableFragmentedSequenced)
    );
    assert_eq!(session.channels.handle("Reliable").unwrap().index(), 1);
    assert_eq!(session.channels.handle("Fast").unwrap().index(), 2);

    session
        .server
        .send(session.to_client, b"handshake", internal, true)
        .unwrap();
    let mut buffer = [0u8; 256];
    let event = session.client.poll_receive(&mut buffer).unwrap();
    assert_eq!(event.channel, Some(internal));
}

#[test]
fn test_queued_messages_flush_in_order() {
    let network = MemoryNetwork::new();
    let mut session = start_session(&network, &game_config());
    let reliable = session.channels.handle("Reliable").unwrap();

    for payload in [b"one".as_slice(), b"two", b"three"] {
        session
            .server
            .send(session.to_client, payload, reliable, false)
            .unwrap();
    }
    assert_eq!(session.client.pending_events(), 0);
    session.server.flush_queued(session.to_client).unwrap();

    let mut buffer = [0u8; 256];
    for expected in [b"one".as_slice(), b"two", b"three"] {
        let event = session.client.poll_receive(&mut buffer).unwrap();
        assert_eq!(&buffer[..event.received], expected);
    }
}

#[test]
fn test_small_receive_buffer() {
    let network = MemoryNetwork::new();
    let mut session = start_session(&network, &game_config());
    let reliable = session.channels.handle("Reliable").unwrap();

    session
        .server
        .send(session.to_client, &[7u8; 32], reliable, true)
        .unwrap();

    let mut buffer = [0u8; 16];
    let result = session.client.poll_receive(&mut buffer);
    assert!(matches!(
        result,
        Err(TransportError::BufferTooSmall {
            needed: 32,
            capacity: 16
        })
    ));
    assert!(session.client.poll_receive(&mut buffer).unwrap().is_nothing());
}

#[test]
fn test_duplicate_channel_names_rejected() {
    let network = MemoryNetwork::new();
    let mut server = network.endpoint();
    let config = game_config().with_channel("Fast", ChannelKind::Unreliable);

    let mut settings = server.settings();
    assert!(ChannelRegistry::register(&config, &mut server, &mut settings).is_err());
}

#[test]
fn test_shutdown_disconnects_peers() {
    let network = MemoryNetwork::new();
    let mut session = start_session(&network, &game_config());

    session.server.shutdown();

    let mut buffer = [0u8; 256];
    assert_eq!(
        session.client.poll_receive(&mut buffer).unwrap(),
        NetEvent::disconnect(session.to_server)
    );
    assert!(session.server.poll_receive(&mut buffer).unwrap().is_nothing());
    assert!(matches!(
        session
            .server
            .register_listen_socket(&TransportSettings::default(), Box::new(|| {})),
        Err(TransportError::ShutDown)
    ));
}
