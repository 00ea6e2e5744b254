//! The reactor driving all flows.
//!
//! An [`Engine`] owns the socket table, the host socket provider and the configuration. It is
//! driven from a single thread by two kinds of calls:
//!
//! * [`input`] with every packet the guest sends, already decoded to its flow tuple and payload.
//! * [`poll`] to wait for readiness of the host sockets and relay whatever became possible.
//!
//! Everything produced for the guest leaves through an [`Egress`] implementation supplied by the
//! surrounding packet framing layer. Received stream data is offered as scatter/gather
//! [`Segments`] straight out of the receive buffer, the framing layer copies what fits into guest
//! packets and reports how much it took.
//!
//! No failure stops the reactor. Every error concerns at most one flow and flows torn down by an
//! error are also reported to the egress as a [`Signal`], so that the guest can be told.
//!
//! ## Time
//!
//! The engine does not read a clock by itself. Call [`tick`] with the current time before driving
//! it, expiration deadlines are computed relative to the last tick.
//!
//! [`Engine`]: struct.Engine.html
//! [`input`]: struct.Engine.html#method.input
//! [`poll`]: struct.Engine.html#method.poll
//! [`tick`]: struct.Engine.html#method.tick
//! [`Egress`]: trait.Egress.html
//! [`Signal`]: enum.Signal.html
//! [`Segments`]: ../storage/struct.Segments.html
use std::net::SocketAddr;

use crate::addr::{Family, FlowTuple, Protocol};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::{Connecting, Errno, Event, HostFd, Interest, Provider, Readiness, Registration, Shutdown};
use crate::socket::{Connect, Origin, QueueClass, SocketKey, SocketTable, VirtualSocket};
use crate::storage::Segments;
use crate::time::{Duration, Instant};

mod datapath;
mod expire;
pub mod translate;


pub use self::datapath::Progress;
pub use self::translate::{translate_inbound, translate_outbound, Route};

/// The guest side consumer of a flow's output.
pub trait Egress {
    /// Offer received stream data to the guest.
    ///
    /// Returns the number of bytes taken, from the start of `data`. Taking fewer bytes, or none,
    /// is how the guest's receive window applies backpressure. The rest is offered again later.
    fn deliver(&mut self, key: SocketKey, class: QueueClass, data: Segments<'_>) -> usize;

    /// Hand a datagram received from `from` to the guest.
    fn datagram(&mut self, key: SocketKey, class: QueueClass, from: SocketAddr, payload: &[u8]);

    /// Hand out-of-band data received from the host to the guest.
    fn urgent(&mut self, key: SocketKey, data: &[u8]) {
        let _ = (key, data);
    }

    /// A change of the flow the guest should learn about.
    fn notify(&mut self, key: SocketKey, signal: Signal);
}

/// Flow events reported to the egress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// The host connection of a guest-initiated flow is established.
    Connected,
    /// The host connection of a guest-initiated flow failed. The flow is gone.
    ConnectFailed(Errno),
    /// A host connection was accepted for the guest, the guest handshake should begin.
    Accepted,
    /// The host finished sending and all its data was delivered.
    Fin,
    /// The flow was torn down by a host error.
    Reset,
    /// Both directions finished, the flow is gone.
    Closed,
    /// The flow idled past its deadline and is gone.
    Expired,
}

/// A packet from the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuestPacket<'a> {
    /// The flow it belongs to, local being the guest.
    pub tuple: FlowTuple,
    /// The type-of-service byte of its IP header.
    pub tos: u8,
    /// What it carries.
    pub segment: Segment<'a>,
}

/// The meaning of a guest packet for its flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Segment<'a> {
    /// Open a stream to the foreign address.
    Syn,
    /// Stream payload.
    Data(&'a [u8]),
    /// Stream payload marked urgent.
    Urgent(&'a [u8]),
    /// The guest will send no more stream data.
    Fin,
    /// The guest aborts the stream.
    Reset,
    /// A datagram or echo request.
    Datagram(&'a [u8]),
}

/// How a guest packet was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Accepted {
    /// A new flow was created for it.
    Created(SocketKey),
    /// It belonged to an existing flow.
    Existing(SocketKey),
}

/// The socket layer reactor.
pub struct Engine<P: Provider, X = ()> {
    table: SocketTable<X>,
    provider: P,
    config: Config,
    now: Instant,
    /// Reused across readiness waits.
    registrations: Vec<Registration>,
    events: Vec<Event>,
    /// Receive space for one datagram.
    scratch: Vec<u8>,
}

impl Accepted {
    /// The flow of the packet.
    pub fn key(self) -> SocketKey {
        match self {
            Accepted::Created(key) | Accepted::Existing(key) => key,
        }
    }
}

impl<P: Provider, X: Default> Engine<P, X> {
    /// Create an engine without flows.
    pub fn new(provider: P, config: Config) -> Self {
        Engine {
            table: SocketTable::new(config.max_sockets),
            provider,
            scratch: vec![0; config.datagram_max],
            config,
            now: Instant::ZERO,
            registrations: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Advance the engine's notion of the current time.
    pub fn tick(&mut self, now: Instant) {
        self.now = now;
    }

    /// The time of the last tick.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The host socket provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The host socket provider, mutably.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Inspect a socket.
    pub fn socket(&self, key: SocketKey) -> Option<&VirtualSocket<X>> {
        self.table.get(key)
    }

    /// Access a socket, mostly for its extension slot.
    pub fn socket_mut(&mut self, key: SocketKey) -> Option<&mut VirtualSocket<X>> {
        self.table.get_mut(key)
    }

    /// All live sockets, in creation order.
    pub fn sockets(&self) -> impl Iterator<Item=(SocketKey, &'_ VirtualSocket<X>)> + '_ {
        self.table.iter()
    }

    /// The socket table.
    pub fn table(&self) -> &SocketTable<X> {
        &self.table
    }

    /// Find the socket handling a flow, listeners match any foreign address.
    pub fn lookup(&mut self, tuple: &FlowTuple) -> Option<SocketKey> {
        self.table.lookup(tuple)
    }

    /// Create an idle socket for a flow, without host binding.
    pub fn create(&mut self, tuple: FlowTuple) -> Result<SocketKey> {
        let socket = VirtualSocket::new(
            tuple,
            self.config.recv_capacity,
            self.config.send_capacity);
        let key = self.table.insert(socket)?;
        net_trace!("{}: created as {:?}", tuple, key);
        Ok(key)
    }

    /// Destroy a socket.
    ///
    /// Releases the host socket. Received data that was not yet delivered is discarded, use
    /// [`close`] to deliver as much as possible first. Freeing twice fails with `Error::Stale`.
    ///
    /// [`close`]: #method.close
    pub fn free(&mut self, key: SocketKey) -> Result<()> {
        let mut socket = self.table.remove(key).ok_or(Error::Stale)?;
        if !socket.recv.is_empty() {
            net_debug!("{}: discarding {} undelivered bytes", socket.tuple(), socket.recv.len());
        }
        socket.machine.abort();
        if let Some(fd) = socket.host.take() {
            self.provider.close(fd);
        }
        net_trace!("{}: freed", socket.tuple());
        Ok(())
    }

    /// Deliver what the guest takes, then destroy the socket.
    pub fn close<E: Egress + ?Sized>(&mut self, key: SocketKey, egress: &mut E) -> Result<()> {
        self.flush(key, egress)?;
        match self.free(key) {
            // Flushing may already have reaped a finished flow.
            Err(Error::Stale) => Ok(()),
            other => other,
        }
    }

    /// Process one packet from the guest.
    ///
    /// Stream openings and the first datagram of a flow create a socket. Data on an unknown flow,
    /// or data the flow's state does not allow, is rejected with `Error::Illegal`, an existing flow
    /// is torn down by it. `Error::BufferFull` leaves the flow untouched, the guest must send the
    /// data again later.
    pub fn input<E: Egress + ?Sized>(
        &mut self,
        packet: GuestPacket<'_>,
        egress: &mut E,
    ) -> Result<Accepted> {
        let tuple = packet.tuple;
        // Guest packets never belong to a listener.
        let existing = self.table.lookup(&tuple)
            .filter(|key| self.table.get(*key).map_or(false, |socket| !socket.is_listening()));

        match packet.segment {
            Segment::Syn => match existing {
                Some(key) => Ok(Accepted::Existing(key)),
                None => {
                    let key = self.open_stream(tuple, packet.tos, egress)?;
                    self.settle(key, egress);
                    Ok(Accepted::Created(key))
                },
            },
            Segment::Datagram(payload) => {
                let accepted = match existing {
                    Some(key) => Accepted::Existing(key),
                    None => Accepted::Created(self.open_datagram(tuple, packet.tos)?),
                };
                let key = accepted.key();
                self.guarded(key, egress, |engine| engine.send_to_datagram_peer(key, payload))?;
                Ok(accepted)
            },
            Segment::Data(data) => {
                let key = existing.ok_or(Error::Illegal)?;
                self.guarded(key, egress, |engine| engine.guest_data(key, data, false))?;
                Ok(Accepted::Existing(key))
            },
            Segment::Urgent(data) => {
                let key = existing.ok_or(Error::Illegal)?;
                self.guarded(key, egress, |engine| engine.guest_data(key, data, true))?;
                Ok(Accepted::Existing(key))
            },
            Segment::Fin => {
                let key = existing.ok_or(Error::Illegal)?;
                self.guarded(key, egress, |engine| engine.guest_fin(key))?;
                Ok(Accepted::Existing(key))
            },
            Segment::Reset => {
                let key = existing.ok_or(Error::Illegal)?;
                net_debug!("{}: reset by guest", tuple);
                self.free(key)?;
                Ok(Accepted::Existing(key))
            },
        }
    }

    /// Wait for host readiness once and relay everything that became possible.
    ///
    /// The wait ends at the latest when the next flow expires. Afterwards pending received data is
    /// offered to the guest again and expired flows are swept. Returns the number of readiness
    /// events handled.
    pub fn poll<E: Egress + ?Sized>(
        &mut self,
        timeout: Option<Duration>,
        egress: &mut E,
    ) -> Result<usize> {
        self.registrations.clear();
        for (key, socket) in self.table.iter() {
            let fd = match socket.host {
                Some(fd) => fd,
                None => continue,
            };
            let interest = interest(socket);
            if !interest.is_empty() {
                self.registrations.push(Registration { fd, interest, token: key.to_bits() });
            }
        }

        let timeout = self.wait_limit(timeout);
        if let Err(errno) = self.provider.poll(&self.registrations, &mut self.events, timeout) {
            if !errno.is_transient() {
                net_warn!("readiness wait failed: {}", errno);
                return Err(Error::Io(errno));
            }
            self.events.clear();
        }

        let events = core::mem::take(&mut self.events);
        let mut handled = 0;
        for event in &events {
            let key = SocketKey::from_bits(event.token);
            // An earlier event of this batch may have freed the socket.
            if !self.table.contains(key) {
                continue;
            }
            handled += 1;
            let result = self.dispatch(key, event.readiness, egress);
            self.conclude(key, result, egress);
        }
        self.events = events;

        for key in self.table.keys() {
            let _ = self.flush(key, egress);
        }
        self.sweep(egress);
        Ok(handled)
    }

    /// Offer a flow's received data to the guest again.
    ///
    /// Call when the guest's window opened. Returns the number of bytes the guest took. A flow
    /// that has finished in both directions is reaped.
    pub fn flush<E: Egress + ?Sized>(&mut self, key: SocketKey, egress: &mut E) -> Result<usize> {
        let downgrade_after = self.config.downgrade_after;
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;

        let mut taken = 0;
        if !socket.recv.is_empty() {
            let class = socket.shaping.class();
            taken = egress.deliver(key, class, socket.recv.segments()).min(socket.recv.len());
            if taken > 0 {
                socket.recv.consume(taken);
                // Delivery is traffic, the flow is not idle.
                socket.refresh(now, expire);
                note_queued(socket, downgrade_after);
            }
        }

        self.settle(key, egress);
        Ok(taken)
    }

    /// The guest drained `packets` of a flow's packets from its queues.
    pub fn dequeued(&mut self, key: SocketKey, packets: u32) -> Result<()> {
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if socket.shaping.dequeue(packets) {
            net_trace!("{}: back to the fast queue", socket.tuple());
        }
        Ok(())
    }

    /// Start accepting host connections on `host_addr` on behalf of the guest at `guest_addr`.
    ///
    /// With `once`, the listener itself becomes the first accepted connection and stops
    /// listening. Returns the listener and the address actually bound, so that an ephemeral port
    /// can be learned.
    pub fn listen(
        &mut self,
        host_addr: SocketAddr,
        guest_addr: SocketAddr,
        once: bool,
    ) -> Result<(SocketKey, SocketAddr)> {
        let family = Family::of(&guest_addr);
        let wildcard = SocketAddr::new(family.unspecified(), 0);
        let key = self.create(FlowTuple::new(Protocol::Tcp, guest_addr, wildcard))?;

        let fd = match self.provider.open(Family::of(&host_addr), Protocol::Tcp.kind()) {
            Ok(fd) => fd,
            Err(errno) => {
                let _ = self.free(key);
                return Err(open_failure(errno));
            },
        };

        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        socket.host = Some(fd);
        socket.flags.accept_once = once;
        socket.origin = Origin::Host;
        socket.machine.listen()?;

        match self.provider.listen(fd, host_addr) {
            Ok(bound) => {
                socket.identity.host_local = Some(bound);
                net_debug!("listening on {} for {}", bound, guest_addr);
                Ok((key, bound))
            },
            Err(errno) => {
                net_debug!("listen on {} failed: {}", host_addr, errno);
                let _ = self.free(key);
                Err(Error::Io(errno))
            },
        }
    }

    /// Stop a listener, given the port of its host socket.
    pub fn unlisten(&mut self, port: u16) -> Result<()> {
        let key = self.table.listener_on(port).ok_or(Error::Stale)?;
        self.free(key)
    }

    /// The guest completed the handshake of an accepted host connection.
    pub fn guest_connected(&mut self, key: SocketKey) -> Result<()> {
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if socket.origin != Origin::Host || socket.connect() != Connect::Connecting {
            return Err(Error::Illegal);
        }
        socket.machine.connected()?;
        socket.refresh(now, expire);
        net_debug!("{}: connected", socket.tuple());

        // Anything the guest sent or closed in the meantime.
        self.write_to_peer(key).map(|_| ())
    }

    fn open_stream<E: Egress + ?Sized>(
        &mut self,
        tuple: FlowTuple,
        tos: u8,
        egress: &mut E,
    ) -> Result<SocketKey> {
        if !tuple.protocol.is_stream() {
            return Err(Error::Illegal);
        }

        let key = self.create(tuple)?;
        let fd = self.attach(key, tos)?;
        let (now, expire_fast) = (self.now, self.config.expire_fast);
        let target = {
            let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
            socket.machine.connecting()?;
            socket.refresh(now, expire_fast);
            socket.identity.host_foreign.unwrap_or(tuple.foreign)
        };

        let progress = match self.provider.connect(fd, target) {
            Ok(progress) => progress,
            Err(errno) if errno.is_transient() => Connecting::InProgress,
            Err(errno) => {
                net_debug!("{}: connect to {} failed: {}", tuple, target, errno);
                let _ = self.free(key);
                egress.notify(key, Signal::ConnectFailed(errno));
                return Err(Error::ConnectFailed(errno));
            },
        };

        let local = self.provider.local_addr(fd).ok();
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        socket.identity.host_local = local;
        if progress == Connecting::Done {
            socket.machine.connected()?;
            socket.refresh(now, expire);
            egress.notify(key, Signal::Connected);
        }
        Ok(key)
    }

    fn open_datagram(&mut self, tuple: FlowTuple, tos: u8) -> Result<SocketKey> {
        if tuple.protocol.is_stream() {
            return Err(Error::Illegal);
        }

        let key = self.create(tuple)?;
        self.attach(key, tos)?;
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        // Nothing to set up, a datagram flow is usable right away.
        socket.machine.connecting()?;
        socket.machine.connected()?;
        socket.refresh(now, expire);
        Ok(key)
    }

    /// Resolve the route of a new flow and open its host socket.
    ///
    /// The socket is freed again on failure.
    fn attach(&mut self, key: SocketKey, tos: u8) -> Result<HostFd> {
        let tuple = *self.table.get(key).ok_or(Error::Stale)?.tuple();
        let route = translate_outbound(&self.config, tuple.protocol, tuple.foreign);

        let fd = match self.provider.open(Family::of(&route.target), tuple.protocol.kind()) {
            Ok(fd) => fd,
            Err(errno) => {
                net_debug!("{}: no host socket: {}", tuple, errno);
                let _ = self.free(key);
                return Err(open_failure(errno));
            },
        };

        if tos != 0 {
            if let Err(errno) = self.provider.set_tos(fd, tos) {
                net_debug!("{}: tos {:#x} not applied: {}", tuple, tos, errno);
            }
        }

        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        socket.host = Some(fd);
        socket.tos = tos;
        socket.identity.host_foreign = Some(route.target);
        socket.flags.via_proxy = route.via_proxy;
        if route.via_proxy || route.target != tuple.foreign {
            net_debug!("{}: host destination {}{}", tuple, route.target,
                if route.via_proxy { " (proxy)" } else { "" });
        }
        Ok(fd)
    }

    fn guest_data(&mut self, key: SocketKey, data: &[u8], urgent: bool) -> Result<()> {
        let (now, expire) = (self.now, self.config.expire);
        self.refill_send_buffer(key, data)?;

        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if urgent {
            socket.urgent = socket.send.len();
        }
        if socket.connect() != Connect::Connected {
            return Ok(());
        }
        socket.refresh(now, expire);
        self.write_to_peer(key).map(|_| ())
    }

    fn guest_fin(&mut self, key: SocketKey) -> Result<()> {
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if !socket.protocol().is_stream() {
            return Err(Error::Illegal);
        }

        let recv_pending = !socket.recv.is_empty();
        let send_pending = !socket.send.is_empty();
        let phase = socket.machine.local_shutdown(recv_pending, send_pending)?;
        net_trace!("{}: guest finished sending, now {:?}", socket.tuple(), phase);

        if socket.connect() == Connect::Connecting {
            return Ok(());
        }

        if socket.machine.is_write_draining() {
            // Shuts down the host side once the buffer drained.
            return self.write_to_peer(key).map(|_| ());
        }

        if let Some(fd) = socket.host {
            if let Err(errno) = self.provider.shutdown(fd, Shutdown::Write) {
                net_debug!("{}: shutdown failed: {}", socket.tuple(), errno);
            }
        }
        Ok(())
    }

    fn dispatch<E: Egress + ?Sized>(
        &mut self,
        key: SocketKey,
        readiness: Readiness,
        egress: &mut E,
    ) -> Result<()> {
        let (connect, origin, stream) = match self.table.get(key) {
            Some(socket) => (socket.connect(), socket.origin, socket.protocol().is_stream()),
            None => return Ok(()),
        };

        if !stream {
            if readiness.readable || readiness.error {
                self.receive_from_datagram_peer(key, egress)?;
            }
            return Ok(());
        }

        match connect {
            Connect::Listening if readiness.readable => self.accept(key, egress),
            Connect::Connecting if origin == Origin::Guest => {
                if readiness.writable || readiness.error {
                    self.finish_connect(key, readiness, egress)?;
                }
                Ok(())
            },
            Connect::Connected => {
                if readiness.urgent {
                    self.read_urgent(key, egress)?;
                }
                if readiness.writable {
                    self.write_to_peer(key)?;
                }
                let reading = self.table.get(key)
                    .map_or(false, |socket| !socket.machine.is_remote_closed()
                        && !socket.machine.is_closed());
                if reading && (readiness.readable || readiness.error) {
                    self.read_from_peer(key)?;
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    fn finish_connect<E: Egress + ?Sized>(
        &mut self,
        key: SocketKey,
        readiness: Readiness,
        egress: &mut E,
    ) -> Result<()> {
        let fd = self.table.get(key).and_then(|socket| socket.host).ok_or(Error::Stale)?;
        let failure = match self.provider.take_error(fd) {
            Ok(None) => None,
            Ok(Some(errno)) | Err(errno) => Some(errno),
        };

        match failure {
            Some(errno) if errno.is_transient() => Ok(()),
            Some(errno) => {
                let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
                net_debug!("{}: connect failed: {}", socket.tuple(), errno);
                socket.machine.connect_failed()?;
                self.free(key)?;
                Err(Error::ConnectFailed(errno))
            },
            None if readiness.writable => {
                let (now, expire) = (self.now, self.config.expire);
                let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
                socket.machine.connected()?;
                socket.refresh(now, expire);
                net_debug!("{}: connected", socket.tuple());
                egress.notify(key, Signal::Connected);
                self.write_to_peer(key).map(|_| ())
            },
            None => Ok(()),
        }
    }

    fn accept<E: Egress + ?Sized>(&mut self, key: SocketKey, egress: &mut E) -> Result<()> {
        let listener = self.table.get(key).ok_or(Error::Stale)?;
        let listen_fd = listener.host.ok_or(Error::Illegal)?;
        let guest = listener.tuple().local;
        let once = listener.flags.accept_once;

        let (fd, remote) = match self.provider.accept(listen_fd) {
            Ok(accepted) => accepted,
            Err(errno) if errno.is_transient() => return Ok(()),
            Err(errno) => {
                // Concerns the pending connection, not the listener.
                net_debug!("accept for {} failed: {}", guest, errno);
                return Ok(());
            },
        };

        let tuple = FlowTuple::new(Protocol::Tcp, guest, translate_inbound(&self.config, remote));
        let local = self.provider.local_addr(fd).ok();
        let (now, expire_fast) = (self.now, self.config.expire_fast);

        let flow = if once {
            if let Err(err) = self.table.retuple(key, tuple) {
                self.provider.close(fd);
                return Err(err);
            }
            self.provider.close(listen_fd);
            key
        } else {
            match self.create(tuple) {
                Ok(flow) => flow,
                Err(err) => {
                    net_debug!("{}: rejected: {}", tuple, err);
                    self.provider.close(fd);
                    return Ok(());
                },
            }
        };

        let socket = self.table.get_mut(flow).ok_or(Error::Stale)?;
        socket.host = Some(fd);
        socket.origin = Origin::Host;
        socket.identity.host_local = local;
        socket.identity.host_foreign = Some(remote);
        socket.machine.connecting()?;
        socket.refresh(now, expire_fast);
        net_debug!("{}: accepted from {}", tuple, remote);
        egress.notify(flow, Signal::Accepted);
        Ok(())
    }

    /// Run a flow operation on behalf of the guest.
    ///
    /// A flow-fatal error is reported to the egress. A state violation tears the flow down.
    fn guarded<E: Egress + ?Sized, T>(
        &mut self,
        key: SocketKey,
        egress: &mut E,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let result = op(self);
        match &result {
            Err(Error::Illegal) if self.table.contains(key) => {
                if let Some(socket) = self.table.get(key) {
                    net_warn!("{}: guest packet not allowed in {:?}", socket.tuple(), socket.phase());
                }
                let _ = self.free(key);
                egress.notify(key, Signal::Reset);
            },
            Err(err) => self.report(key, *err, egress),
            Ok(_) => self.settle(key, egress),
        }
        result
    }

    fn conclude<E: Egress + ?Sized>(&mut self, key: SocketKey, result: Result<()>, egress: &mut E) {
        match result {
            Ok(()) => self.settle(key, egress),
            Err(err) => self.report(key, err, egress),
        }
    }

    fn report<E: Egress + ?Sized>(&mut self, key: SocketKey, err: Error, egress: &mut E) {
        match err {
            Error::Io(_) => egress.notify(key, Signal::Reset),
            Error::ConnectFailed(errno) => egress.notify(key, Signal::ConnectFailed(errno)),
            other => {
                net_debug!("{:?}: {}", key, other);
                self.settle(key, egress);
            },
        }
    }

    /// Pass on the host's end of stream and reap a finished flow.
    fn settle<E: Egress + ?Sized>(&mut self, key: SocketKey, egress: &mut E) {
        let socket = match self.table.get_mut(key) {
            Some(socket) => socket,
            None => return,
        };

        if socket.machine.is_remote_closed() && socket.recv.is_empty() && !socket.eof_signalled {
            socket.eof_signalled = true;
            let phase = socket.machine.recv_drained(false);
            net_trace!("{}: host data delivered, now {:?}", socket.tuple(), phase);
            egress.notify(key, Signal::Fin);
        }

        if socket.machine.is_closed() {
            net_debug!("{}: closed", socket.tuple());
            let _ = self.free(key);
            egress.notify(key, Signal::Closed);
        }
    }

    /// Tear a flow down after a hard host error.
    fn fatal(&mut self, key: SocketKey, errno: Errno) -> Error {
        if let Some(socket) = self.table.get(key) {
            net_debug!("{}: host socket failed: {}", socket.tuple(), errno);
        }
        let _ = self.free(key);
        Error::Io(errno)
    }

    fn wait_limit(&self, timeout: Option<Duration>) -> Option<Duration> {
        let until_expiry = self.next_expiry().map(|at| self.now.until(at));
        match (timeout, until_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl<P: Provider, X> Drop for Engine<P, X> {
    fn drop(&mut self) {
        for key in self.table.keys() {
            if let Some(fd) = self.table.remove(key).and_then(|socket| socket.host) {
                self.provider.close(fd);
            }
        }
    }
}

/// The readiness a socket waits for.
fn interest<X>(socket: &VirtualSocket<X>) -> Interest {
    if !socket.protocol().is_stream() {
        return Interest { readable: true, ..Interest::default() };
    }

    match socket.connect() {
        Connect::Listening => Interest { readable: true, ..Interest::default() },
        Connect::Connecting if socket.origin == Origin::Guest => {
            Interest { writable: true, ..Interest::default() }
        },
        Connect::Connected => {
            let open = !socket.machine.is_remote_closed();
            Interest {
                readable: open && socket.recv.window() > 0,
                writable: !socket.send.is_empty(),
                urgent: open,
            }
        },
        _ => Interest::default(),
    }
}

/// Account one packet queued towards the guest.
fn note_queued<X>(socket: &mut VirtualSocket<X>, downgrade_after: u32) {
    if socket.shaping.enqueue(downgrade_after) {
        net_trace!("{}: moved to the batch queue after {} packets",
            socket.tuple(), socket.shaping.consecutive());
    }
}

fn open_failure(errno: Errno) -> Error {
    match errno.0 {
        libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM => Error::Exhausted,
        _ => Error::Io(errno),
    }
}
