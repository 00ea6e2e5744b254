//! An echo service on a host port.
//!
//! Accepts host connections on the given address and relays each of them to a pretend guest that
//! sends every byte straight back. This drives the whole path through real host sockets without a
//! guest. Build with `--features log` and set `RUST_LOG=debug` to follow the flows.
use std::mem;
use std::net::SocketAddr;
use structopt::StructOpt;

use usernet::host::sys::System;
use usernet::socket::QueueClass;
use usernet::storage::Segments;
use usernet::time::{Duration, Instant};
use usernet::{Config, Egress, Engine, Error, GuestPacket, Segment, Signal, SocketKey};

fn main() {
    env_logger::init();

    let Options {
        listen,
        guest,
        expire,
        max_sockets,
        once,
    } = Options::from_args();

    let config = Config {
        expire: Duration::from_secs(expire),
        max_sockets,
        ..Config::default()
    };
    let provider = System::new()
        .expect("Couldn't set up host sockets");
    let mut engine: Engine<_> = Engine::new(provider, config);

    let (_, bound) = engine.listen(listen, guest, once)
        .expect(&format!("Couldn't listen on {}", listen));
    println!("Echoing on {}", bound);

    let mut echo = Echo::default();
    loop {
        engine.tick(Instant::now());
        if let Err(err) = engine.poll(Some(Duration::from_secs(1)), &mut echo) {
            eprintln!("Readiness wait failed: {}", err);
            break;
        }

        // Actions the engine could not take yet, kept in order per connection.
        let mut retry: Vec<(SocketKey, Action)> = Vec::new();
        for (key, action) in mem::take(&mut echo.pending) {
            if retry.iter().any(|(blocked, _)| *blocked == key) {
                retry.push((key, action));
                continue;
            }
            let tuple = match engine.socket(key) {
                Some(socket) => *socket.tuple(),
                None => continue,
            };
            let result = match &action {
                Action::Handshake => engine.guest_connected(key),
                Action::Send(data) => engine
                    .input(GuestPacket { tuple, tos: 0, segment: Segment::Data(data) }, &mut echo)
                    .map(drop),
                Action::Close => engine
                    .input(GuestPacket { tuple, tos: 0, segment: Segment::Fin }, &mut echo)
                    .map(drop),
            };
            match result {
                Ok(()) => (),
                Err(Error::BufferFull) => retry.push((key, action)),
                Err(err) => eprintln!("{}: {}", tuple, err),
            }
        }
        retry.append(&mut echo.pending);
        echo.pending = retry;

        if once && engine.table().is_empty() {
            break;
        }
    }
}

/// A guest echoing everything back.
#[derive(Default)]
struct Echo {
    pending: Vec<(SocketKey, Action)>,
}

enum Action {
    Handshake,
    Send(Vec<u8>),
    Close,
}

impl Egress for Echo {
    fn deliver(&mut self, key: SocketKey, _: QueueClass, data: Segments<'_>) -> usize {
        // Leave the data with the engine until the last echo went out.
        if self.pending.iter().any(|(of, action)| *of == key && matches!(action, Action::Send(_))) {
            return 0;
        }
        self.pending.push((key, Action::Send(data.to_vec())));
        data.total()
    }

    fn datagram(&mut self, _: SocketKey, _: QueueClass, _: SocketAddr, _: &[u8]) { }

    fn notify(&mut self, key: SocketKey, signal: Signal) {
        match signal {
            Signal::Accepted => self.pending.push((key, Action::Handshake)),
            Signal::Fin => self.pending.push((key, Action::Close)),
            other => println!("{:?}: {:?}", key, other),
        }
    }
}

#[derive(StructOpt)]
struct Options {
    /// The host address to accept connections on.
    listen: SocketAddr,
    /// The guest address the connections are relayed to.
    #[structopt(long = "guest", default_value = "10.0.2.15:7")]
    guest: SocketAddr,
    /// Idle timeout of a connection in seconds.
    #[structopt(long = "expire", default_value = "240")]
    expire: u64,
    #[structopt(long = "max-sockets", default_value = "1024")]
    max_sockets: usize,
    /// Stop after the first connection.
    #[structopt(long = "once")]
    once: bool,
}
