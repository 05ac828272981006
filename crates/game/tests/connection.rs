use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ae::net::SERVER_PEER;
use ae::{NetworkEvent, Reliability, Transport, TransportConfig, UdpTransport};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn local(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

/// Pumps both transports until `side` yields an event matching `pred`.
fn wait_for_event(
    transports: &mut [&mut UdpTransport],
    side: usize,
    timeout_ms: u64,
    pred: impl Fn(&NetworkEvent) -> bool,
) -> Option<NetworkEvent> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        for (index, transport) in transports.iter_mut().enumerate() {
            transport.update(0.001);
            if index != side {
                while transport.next_event().is_some() {}
                continue;
            }
            while let Some(event) = transport.next_event() {
                if pred(&event) {
                    return Some(event);
                }
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

fn handshake(port: u16, config: &TransportConfig) -> (UdpTransport, UdpTransport) {
    let mut server = UdpTransport::listen(local(port), config).unwrap();
    let mut client = UdpTransport::connect(local(port), config).unwrap();

    let event = wait_for_event(&mut [&mut client, &mut server], 0, 500, |e| {
        matches!(e, NetworkEvent::Connect(_))
    });
    assert_eq!(event, Some(NetworkEvent::Connect(SERVER_PEER)));
    (client, server)
}

#[test]
fn test_handshake_connects_both_sides() {
    let config = TransportConfig::default();
    let (client, server) = handshake(next_port(), &config);

    assert!(client.is_connected(SERVER_PEER));
    assert_eq!(server.connected_peers(), 1);
    assert!(server.is_connected(1));
}

#[test]
fn test_payload_reaches_server() {
    let config = TransportConfig::default();
    let (mut client, mut server) = handshake(next_port(), &config);

    client
        .send_packet(SERVER_PEER, b"hello", Reliability::Unreliable, 0)
        .unwrap();

    let event = wait_for_event(&mut [&mut client, &mut server], 1, 500, |e| {
        matches!(e, NetworkEvent::Packet { .. })
    })
    .expect("payload delivered");

    match event {
        NetworkEvent::Packet {
            peer,
            channel,
            reliability,
            data,
        } => {
            assert_eq!(peer, 1);
            assert_eq!(channel, 0);
            assert_eq!(reliability, Reliability::Unreliable);
            assert_eq!(data, b"hello");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_reliable_payload_reaches_client() {
    let config = TransportConfig::default();
    let (mut client, mut server) = handshake(next_port(), &config);

    server
        .send_packet(1, &[7, 8, 9], Reliability::Reliable, 2)
        .unwrap();

    let event = wait_for_event(&mut [&mut client, &mut server], 0, 500, |e| {
        matches!(e, NetworkEvent::Packet { .. })
    });
    assert_eq!(
        event,
        Some(NetworkEvent::Packet {
            peer: SERVER_PEER,
            channel: 2,
            reliability: Reliability::Reliable,
            data: vec![7, 8, 9],
        })
    );
}

#[test]
fn test_send_to_unknown_peer_fails() {
    let config = TransportConfig::default();
    let mut server = UdpTransport::listen(local(next_port()), &config).unwrap();

    assert!(server
        .send_packet(42, b"x", Reliability::Unreliable, 0)
        .is_err());
}

#[test]
fn test_full_server_denies_second_client() {
    let port = next_port();
    let config = TransportConfig {
        max_peers: 1,
        ..TransportConfig::default()
    };
    let (mut first, mut server) = handshake(port, &config);
    let mut second = UdpTransport::connect(local(port), &config).unwrap();

    let event = wait_for_event(&mut [&mut second, &mut server, &mut first], 0, 500, |e| {
        matches!(e, NetworkEvent::Disconnect(_))
    });
    assert_eq!(event, Some(NetworkEvent::Disconnect(SERVER_PEER)));
    assert!(!second.is_connected(SERVER_PEER));
    assert_eq!(server.connected_peers(), 1);
}

#[test]
fn test_disconnect_notifies_server() {
    let config = TransportConfig::default();
    let (mut client, mut server) = handshake(next_port(), &config);

    client.disconnect(SERVER_PEER);

    let event = wait_for_event(&mut [&mut client, &mut server], 1, 500, |e| {
        matches!(e, NetworkEvent::Disconnect(_))
    });
    assert_eq!(event, Some(NetworkEvent::Disconnect(1)));
    assert_eq!(server.connected_peers(), 0);
}
