//! Relaying through real host sockets on the loopback interface.
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, UdpSocket};

use usernet::host::sys::System;
use usernet::socket::QueueClass;
use usernet::storage::Segments;
use usernet::time::Duration;
use usernet::{Config, Egress, Engine, FlowTuple, GuestPacket, Protocol, Segment, Signal, SocketKey};

const GUEST: &str = "10.0.2.15:41000";
const WAIT: Duration = Duration::from_millis(50);
const ROUNDS: usize = 100;

#[derive(Default)]
struct Guest {
    received: Vec<u8>,
    datagrams: Vec<(SocketAddr, Vec<u8>)>,
    signals: Vec<Signal>,
}

impl Egress for Guest {
    fn deliver(&mut self, _: SocketKey, _: QueueClass, data: Segments<'_>) -> usize {
        self.received.extend(data.to_vec());
        data.total()
    }

    fn datagram(&mut self, _: SocketKey, _: QueueClass, from: SocketAddr, payload: &[u8]) {
        self.datagrams.push((from, payload.to_vec()));
    }

    fn notify(&mut self, _: SocketKey, signal: Signal) {
        self.signals.push(signal);
    }
}

fn guest_addr() -> SocketAddr {
    GUEST.parse().unwrap()
}

fn poll_until(engine: &mut Engine<System>, guest: &mut Guest, done: impl Fn(&Guest) -> bool) {
    for _ in 0..ROUNDS {
        if done(guest) {
            return;
        }
        engine.poll(Some(WAIT), guest).expect("Readiness wait failed");
    }
    assert!(done(guest), "Condition not reached after {} rounds", ROUNDS);
}

#[test]
fn stream() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Could not bind a listener");
    let remote = listener.local_addr().unwrap();
    let provider = System::new().expect("Could not create host provider");
    let mut engine: Engine<System> = Engine::new(provider, Config::default());
    let mut guest = Guest::default();

    let tuple = FlowTuple::new(Protocol::Tcp, guest_addr(), remote);
    let key = engine.input(GuestPacket { tuple, tos: 0, segment: Segment::Syn }, &mut guest)
        .expect("Could not open the stream")
        .key();
    poll_until(&mut engine, &mut guest, |guest| guest.signals.contains(&Signal::Connected));

    let (mut server, _) = listener.accept().expect("Connection not accepted");
    server.set_read_timeout(Some(std::time::Duration::from_secs(5))).unwrap();

    engine.input(GuestPacket { tuple, tos: 0, segment: Segment::Data(b"hello") }, &mut guest)
        .expect("Guest data not taken");
    let mut greeting = [0; 5];
    server.read_exact(&mut greeting).expect("Guest data never arrived");
    assert_eq!(&greeting, b"hello");

    server.write_all(b"world").unwrap();
    drop(server);
    poll_until(&mut engine, &mut guest, |guest| guest.signals.contains(&Signal::Fin));
    assert_eq!(guest.received, b"world");

    engine.input(GuestPacket { tuple, tos: 0, segment: Segment::Fin }, &mut guest)
        .expect("Guest close not taken");
    assert!(engine.socket(key).is_none());
    assert_eq!(guest.signals.last(), Some(&Signal::Closed));
}

#[test]
fn datagram() {
    let server = UdpSocket::bind("127.0.0.1:0").expect("Could not bind a socket");
    server.set_read_timeout(Some(std::time::Duration::from_secs(5))).unwrap();
    let remote = server.local_addr().unwrap();
    let provider = System::new().expect("Could not create host provider");
    let mut engine: Engine<System> = Engine::new(provider, Config::default());
    let mut guest = Guest::default();

    let tuple = FlowTuple::new(Protocol::Udp, guest_addr(), remote);
    engine.input(GuestPacket { tuple, tos: 0, segment: Segment::Datagram(b"ping") }, &mut guest)
        .expect("Could not send the datagram");

    let mut buf = [0; 16];
    let (len, from) = server.recv_from(&mut buf).expect("Datagram never arrived");
    assert_eq!(&buf[..len], b"ping");
    server.send_to(b"pong", from).unwrap();

    poll_until(&mut engine, &mut guest, |guest| !guest.datagrams.is_empty());
    assert_eq!(guest.datagrams, [(remote, b"pong".to_vec())]);
}

#[test]
fn refused() {
    // Bind and drop to find a port nobody listens on.
    let remote = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let provider = System::new().expect("Could not create host provider");
    let mut engine: Engine<System> = Engine::new(provider, Config::default());
    let mut guest = Guest::default();

    let tuple = FlowTuple::new(Protocol::Tcp, guest_addr(), remote);
    match engine.input(GuestPacket { tuple, tos: 0, segment: Segment::Syn }, &mut guest) {
        Ok(_) => poll_until(&mut engine, &mut guest, |guest| !guest.signals.is_empty()),
        // Refused synchronously.
        Err(err) => assert!(err.is_flow_fatal()),
    }

    assert!(matches!(guest.signals.as_slice(), [Signal::ConnectFailed(_)]));
    assert!(engine.table().is_empty());
}
