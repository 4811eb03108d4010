//! UDP transport integration coverage: outbound fragmentation and inbound
//! reassembly across the `MORE_FOLLOWS` flag (invariant 5 / S5), plus the
//! session-prefix contract exercised directly.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use homehub::transport::udp::{UdpConfig, UdpTransport};
use homehub::transport::{PeerId, Transport, MSG_STATE_CHANGED};

const MORE_FOLLOWS: u8 = 0x01;

#[test]
fn send_fragments_a_large_payload_into_bounded_chunks_with_more_follows_flags() {
    let transport = UdpTransport::new(UdpConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 49201,
        buffer_size: 10,
        ..Default::default()
    });
    transport.start().unwrap();

    let listener = UdpSocket::bind("127.0.0.1:49202").unwrap();
    listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let payload: Vec<u8> = (0..20u8).collect();
    transport.send(MSG_STATE_CHANGED, &payload, PeerId::Udp("127.0.0.1:49202".parse().unwrap()));

    let mut reassembled = Vec::new();
    let mut flags_seen = Vec::new();
    for _ in 0..3 {
        let mut buf = [0u8; 16];
        let (n, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(buf[0], MSG_STATE_CHANGED);
        flags_seen.push(buf[1]);
        reassembled.extend_from_slice(&buf[2..n]);
    }

    assert_eq!(flags_seen, vec![MORE_FOLLOWS, MORE_FOLLOWS, 0]);
    assert_eq!(reassembled, payload);

    transport.stop();
}

#[test]
fn send_fits_a_small_payload_in_a_single_unfragmented_packet() {
    let transport = UdpTransport::new(UdpConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 49204,
        buffer_size: 1500,
        ..Default::default()
    });
    transport.start().unwrap();

    let listener = UdpSocket::bind("127.0.0.1:49205").unwrap();
    listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    transport.send(MSG_STATE_CHANGED, b"short", PeerId::Udp("127.0.0.1:49205".parse().unwrap()));

    let mut buf = [0u8; 32];
    let (n, _) = listener.recv_from(&mut buf).unwrap();
    assert_eq!(buf[0], MSG_STATE_CHANGED);
    assert_eq!(buf[1], 0, "a single packet carries no MORE_FOLLOWS flag");
    assert_eq!(&buf[2..n], b"short");

    transport.stop();
}

#[test]
fn receive_loop_reassembles_a_fragmented_payload_and_invokes_the_handler_once() {
    let transport = Arc::new(UdpTransport::new(UdpConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 49203,
        buffer_size: 1500,
        ..Default::default()
    }));

    let captured: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let captured_clone = Arc::clone(&captured);
    transport.set_handler(Arc::new(move |_transport: &dyn Transport, _peer: PeerId, msg_type: u8, payload: &[u8]| {
        captured_clone.lock().unwrap().push((msg_type, payload.to_vec()));
    }));
    transport.start().unwrap();
    let handle = homehub::transport::udp::spawn_receiver(Arc::clone(&transport));

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let dest: std::net::SocketAddr = "127.0.0.1:49203".parse().unwrap();

    let mut first = vec![MSG_STATE_CHANGED, MORE_FOLLOWS];
    first.extend_from_slice(b"hello, ");
    sender.send_to(&first, dest).unwrap();

    let mut last = vec![MSG_STATE_CHANGED, 0];
    last.extend_from_slice(b"world");
    sender.send_to(&last, dest).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while captured.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    transport.stop();
    let _ = handle.join();

    let messages = captured.lock().unwrap();
    assert_eq!(messages.len(), 1, "the two fragments should merge into exactly one dispatched message");
    assert_eq!(messages[0].0, MSG_STATE_CHANGED);
    assert_eq!(messages[0].1, b"hello, world");
}

#[test]
fn session_prefix_is_exactly_session_id_len_bytes() {
    let transport = UdpTransport::new(UdpConfig::default());
    let peer = PeerId::Udp("127.0.0.1:49999".parse().unwrap());
    let session_id = "0123456789abcdef0123456789abcdef";
    transport.authentication_succeeded(&session_id[..32], peer);

    let mut payload = session_id[..32].as_bytes().to_vec();
    payload.extend_from_slice(b"rest-of-message");
    assert!(transport.is_valid_session(&payload, peer));
    assert_eq!(transport.strip_session_prefix(&payload), b"rest-of-message");

    let other_peer = PeerId::Udp("127.0.0.1:50000".parse().unwrap());
    assert!(!transport.is_valid_session(&payload, other_peer));
}
