use std::net::SocketAddr;

use crate::addr::{FlowTuple, Protocol};
use crate::error::Error;
use super::{Connect, Phase, SocketKey, SocketTable, VirtualSocket};

const GUEST: &str = "10.0.2.15:40000";
const REMOTE: &str = "93.184.216.34:80";

fn addr(s: &str) -> SocketAddr {
    s.parse().expect("Valid socket address literal")
}

fn tcp(local: &str, foreign: &str) -> FlowTuple {
    FlowTuple::new(Protocol::Tcp, addr(local), addr(foreign))
}

fn socket(tuple: FlowTuple) -> VirtualSocket {
    VirtualSocket::new(tuple, 64, 64)
}

fn listener(local: &str) -> VirtualSocket {
    let mut socket = socket(tcp(local, "0.0.0.0:0"));
    socket.machine.listen().expect("Fresh socket can listen");
    socket
}

#[test]
fn fresh_socket() {
    let socket = socket(tcp(GUEST, REMOTE));
    assert_eq!(socket.connect(), Connect::Idle);
    assert_eq!(socket.phase(), Phase::Idle);
    assert!(socket.host().is_none());
    assert!(socket.recv_buffer().is_empty());
    assert!(socket.send_buffer().is_empty());
    assert_eq!(socket.shaping().queued(), 0);
    assert_eq!(socket.recv_buffer().capacity(), 64);
}

#[test]
fn datagram_flows_are_unbuffered() {
    let udp = FlowTuple::new(Protocol::Udp, addr(GUEST), addr("8.8.8.8:53"));
    let socket: VirtualSocket = VirtualSocket::new(udp, 64, 64);
    assert_eq!(socket.recv_buffer().capacity(), 0);
    assert_eq!(socket.send_buffer().capacity(), 0);
}

#[test]
fn draining_depends_on_buffer() {
    let mut socket = socket(tcp(GUEST, REMOTE));
    socket.machine.connecting().unwrap();
    socket.machine.connected().unwrap();
    assert_eq!(socket.recv.write(&[0; 16]), 16);
    socket.machine.remote_shutdown(true).unwrap();
    assert_eq!(socket.phase(), Phase::Draining);
    socket.recv.consume(16);
    assert_eq!(socket.phase(), Phase::HalfClosedRemote);
}

#[test]
fn unique_tuples() {
    let mut table = SocketTable::new(8);
    table.insert(socket(tcp(GUEST, REMOTE))).unwrap();
    assert_eq!(table.insert(socket(tcp(GUEST, REMOTE))).err(), Some(Error::Illegal));
    assert_eq!(table.len(), 1);
}

#[test]
fn listeners_share_guest_port() {
    let mut table = SocketTable::new(8);
    let first = table.insert(listener("10.0.2.15:22")).unwrap();
    let second = table.insert(listener("10.0.2.15:22")).unwrap();
    assert_ne!(first, second);
    assert_eq!(table.len(), 2);

    // A flow being set up next to them is still possible, and only once.
    let pending = table.insert(socket(tcp("10.0.2.15:22", "0.0.0.0:0"))).unwrap();
    assert_eq!(
        table.insert(socket(tcp("10.0.2.15:22", "0.0.0.0:0"))).err(),
        Some(Error::Illegal));
    table.remove(pending);

    let flow = tcp("10.0.2.15:22", "192.0.2.7:5555");
    assert!(matches!(table.lookup(&flow), Some(key) if key == first || key == second));
}

#[test]
fn table_full() {
    let mut table = SocketTable::new(1);
    table.insert(socket(tcp(GUEST, REMOTE))).unwrap();
    let other = tcp("10.0.2.15:40001", REMOTE);
    assert_eq!(table.insert(socket(other)).err(), Some(Error::Exhausted));
}

#[test]
fn double_remove() {
    let mut table = SocketTable::new(4);
    let key = table.insert(socket(tcp(GUEST, REMOTE))).unwrap();
    assert!(table.remove(key).is_some());
    assert!(table.remove(key).is_none());
    assert!(!table.contains(key));

    // Reusing the storage does not revive the old key.
    let fresh = table.insert(socket(tcp(GUEST, REMOTE))).unwrap();
    assert_ne!(key, fresh);
    assert!(table.get(key).is_none());
}

#[test]
fn lookup_prefers_exact_match() {
    let mut table = SocketTable::new(8);
    let listening = table.insert(listener("10.0.2.15:22")).unwrap();
    let flow = tcp("10.0.2.15:22", "192.0.2.7:5555");

    assert_eq!(table.lookup(&flow), Some(listening));

    let connected = table.insert(socket(flow)).unwrap();
    assert_eq!(table.lookup(&flow), Some(connected));
    // Served from the cache the second time, same answer.
    assert_eq!(table.lookup(&flow), Some(connected));

    let unrelated = tcp("10.0.2.15:23", "192.0.2.7:5555");
    assert_eq!(table.lookup(&unrelated), None);
}

#[test]
fn lookup_cache_forgets_removed() {
    let mut table = SocketTable::new(8);
    let flow = tcp(GUEST, REMOTE);
    let key = table.insert(socket(flow)).unwrap();
    assert_eq!(table.lookup(&flow), Some(key));
    table.remove(key);
    assert_eq!(table.lookup(&flow), None);
}

#[test]
fn retuple_keeps_uniqueness() {
    let mut table = SocketTable::new(8);
    let a = table.insert(socket(tcp(GUEST, REMOTE))).unwrap();
    let b = table.insert(listener("10.0.2.15:22")).unwrap();
    assert_eq!(table.retuple(b, tcp(GUEST, REMOTE)), Err(Error::Illegal));
    table.retuple(b, tcp("10.0.2.15:22", "192.0.2.7:5555")).unwrap();
    table.retuple(a, tcp(GUEST, REMOTE)).unwrap();
    table.remove(a);
    assert_eq!(table.retuple(a, tcp(GUEST, REMOTE)), Err(Error::Stale));
}

#[test]
fn insertion_order() {
    let mut table = SocketTable::new(8);
    let keys: Vec<SocketKey> = (0..4)
        .map(|i| {
            let local = format!("10.0.2.15:{}", 40000 + i);
            table.insert(socket(tcp(&local, REMOTE))).unwrap()
        })
        .collect();
    table.remove(keys[1]);
    assert_eq!(table.keys(), vec![keys[0], keys[2], keys[3]]);
}

#[test]
fn key_bits() {
    let mut table = SocketTable::new(2);
    let key = table.insert(socket(tcp(GUEST, REMOTE))).unwrap();
    assert_eq!(SocketKey::from_bits(key.to_bits()), key);
}
