//! Sessions over real UDP sockets on the loopback interface

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use tickwire::protocol::{
    ChannelKind, ChannelRegistry, EventKind, ListenHost, NetEvent, SessionConfiguration,
    Transport, TransportSettings,
};
use tickwire::transport::UdpTransport;
use tokio::runtime::Handle;

const DEADLINE: Duration = Duration::from_secs(5);

async fn next_event(transport: &mut UdpTransport, buffer: &mut [u8]) -> NetEvent {
    let started = Instant::now();
    loop {
        let event = transport.poll_receive(buffer).unwrap();
        if !event.is_nothing() {
            return event;
        }
        assert!(started.elapsed() < DEADLINE, "no event within {:?}", DEADLINE);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn loopback_settings(config: &SessionConfiguration) -> TransportSettings {
    TransportSettings {
        listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        listen_hosts: vec![ListenHost::new("UDP Socket", 0)],
        ping_interval: Duration::from_millis(50),
        ..TransportSettings::from_config(config)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_session_with_registered_channels() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = SessionConfiguration::default()
        .with_channel("Reliable", ChannelKind::Reliable)
        .with_channel("Fast", ChannelKind::UnreliableSequenced);

    let mut server = UdpTransport::new(Handle::current());
    let mut settings = loopback_settings(&config);
    let channels = ChannelRegistry::register(&config, &mut server, &mut settings).unwrap();
    server
        .register_listen_socket(&settings, Box::new(|| {}))
        .unwrap();
    let port = server.local_addr(0).unwrap().port();

    let mut client = UdpTransport::new(Handle::current());
    let to_server = client
        .connect("127.0.0.1", port, &settings, Box::new(|| {}))
        .unwrap();

    let mut buffer = vec![0u8; config.message_buffer_size as usize];
    assert_eq!(
        next_event(&mut client, &mut buffer).await,
        NetEvent::connect(to_server)
    );
    let accepted = next_event(&mut server, &mut buffer).await;
    assert_eq!(accepted.kind, EventKind::Connect);
    let to_client = accepted.peer;

    let fast = channels.handle("Fast").unwrap();
    client.send(to_server, b"tick 1", fast, true).unwrap();
    let data = next_event(&mut server, &mut buffer).await;
    assert_eq!(data, NetEvent::data(to_client, fast, 6));
    assert_eq!(&buffer[..6], b"tick 1");

    let reliable = channels.handle("Reliable").unwrap();
    server.send(to_client, b"state", reliable, false).unwrap();
    server.flush_queued(to_client).unwrap();
    let data = next_event(&mut client, &mut buffer).await;
    assert_eq!(data.channel, Some(reliable));
    assert_eq!(&buffer[..data.received], b"state");

    server.disconnect_client(to_client);
    assert_eq!(
        next_event(&mut client, &mut buffer).await,
        NetEvent::disconnect(to_server)
    );

    client.shutdown();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_clock_helpers() {
    let config = SessionConfiguration::default();
    let settings = {
        let mut settings = loopback_settings(&config);
        settings
            .add_channel(ChannelKind::ReliableFragmentedSequenced)
            .unwrap();
        settings
    };

    let mut server = UdpTransport::new(Handle::current());
    server
        .register_listen_socket(&settings, Box::new(|| {}))
        .unwrap();
    let port = server.local_addr(0).unwrap().port();

    let mut client = UdpTransport::new(Handle::current());
    let to_server = client
        .connect("127.0.0.1", port, &settings, Box::new(|| {}))
        .unwrap();
    let mut buffer = [0u8; 256];
    assert_eq!(
        next_event(&mut client, &mut buffer).await,
        NetEvent::connect(to_server)
    );

    let before = client.network_timestamp();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(client.network_timestamp() >= before + 20);

    // a timestamp from the future never yields a negative delay
    let delay = client
        .remote_delay(to_server, client.network_timestamp() + 10_000)
        .unwrap();
    assert_eq!(delay, 0);
}
