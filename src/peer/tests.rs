use super::*;
use std::net::{IpAddr, Ipv4Addr};

#[test]
fn test_peer_id_random() {
    let id1 = PeerId::random();
    let id2 = PeerId::random();
    assert_ne!(id1, id2);
}

#[test]
fn test_peer_id_from_hex_short() {
    let id = PeerId::from_hex("0x50").unwrap();
    assert_eq!(id.0[19], 0x50);
    assert_eq!(id.0[..19], [0u8; 19]);
}

#[test]
fn test_peer_id_from_hex_roundtrip() {
    let id = PeerId::random();
    let parsed = PeerId::from_hex(&id.to_hex()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn test_peer_id_from_hex_invalid() {
    assert!(PeerId::from_hex("").is_none());
    assert!(PeerId::from_hex("zz").is_none());
    assert!(PeerId::from_hex(&"f".repeat(41)).is_none());
}

#[test]
fn test_peer_id_distance() {
    let a = PeerId([0u8; 20]);
    let b = PeerId([0xFF; 20]);
    assert_eq!(a.distance(&b), [0xFF; 20]);
    assert_eq!(a.distance(&a), [0u8; 20]);
}

#[test]
fn test_peer_id_seed_deterministic() {
    let id = PeerId::from_hex("0xabcdef").unwrap();
    assert_eq!(id.seed(), id.seed());
}

#[test]
fn test_socket_address_conversions() {
    let psa = PeerSocketAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 4000, 4001);
    assert_eq!(psa.tcp().port(), 4000);
    assert_eq!(psa.udp().port(), 4001);
    assert_eq!(psa.tcp().ip(), psa.udp().ip());
}

#[test]
fn test_peer_address_builders_leave_original_untouched() {
    let base = PeerAddress::localhost(PeerId::random(), 2424, 2424);
    let moved = base
        .with_ports(8000, 8001)
        .with_relayed(true)
        .with_firewalled_tcp(true);

    assert_eq!(base.tcp_port, 2424);
    assert!(!base.relayed);
    assert_eq!(moved.tcp_port, 8000);
    assert_eq!(moved.udp_port, 8001);
    assert!(moved.relayed);
    assert!(moved.firewalled_tcp);
    assert_eq!(base.id, moved.id);
}

#[test]
fn test_peer_address_with_socket_overwrites_all() {
    let base = PeerAddress::localhost(PeerId::random(), 1, 2);
    let relay = PeerSocketAddress::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)), 5000, 5001);
    let rewritten = base.with_socket(relay);

    assert_eq!(rewritten.addr, relay.addr);
    assert_eq!(rewritten.tcp_port, 5000);
    assert_eq!(rewritten.udp_port, 5001);
}
