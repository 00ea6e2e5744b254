//! The per-flow record and its collection.
//!
//! A [`VirtualSocket`] binds one guest flow to the host socket relaying it. It owns both byte
//! buffers of the flow, its connection state and its queue and expiry accounting. Sockets live in
//! a [`SocketTable`] and are addressed by [`SocketKey`]s, which behave similar to specialized file
//! descriptors: a key of a freed socket is detected on use and never aliases a newer socket that
//! happens to reuse the storage.
//!
//! This module offers mostly inspection. State changes happen through the engine which keeps the
//! host socket, the buffers and the state machine consistent with each other.
//!
//! [`VirtualSocket`]: struct.VirtualSocket.html
//! [`SocketTable`]: struct.SocketTable.html
//! [`SocketKey`]: struct.SocketKey.html
use std::net::SocketAddr;

use crate::addr::{Family, FlowTuple, Protocol};
use crate::host::{HostFd, NO_HOST_BINDING};
use crate::storage::SocketBuffer;
use crate::time::{Duration, Expiration, Instant};

pub mod queue;
pub mod state;
mod table;

#[cfg(test)]
mod tests;

pub use self::queue::{QueueClass, Shaping};
pub use self::state::{Connect, Machine, Phase};
pub use self::table::{SocketKey, SocketTable};

/// Addresses of a flow on both sides of the translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    /// The flow as seen by the guest.
    pub tuple: FlowTuple,
    /// The address of the host socket, once bound.
    pub host_local: Option<SocketAddr>,
    /// The address the host socket talks to, after translation.
    pub host_foreign: Option<SocketAddr>,
}

/// Per-flow markers besides the connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    /// A listener that turns into the first connection it accepts.
    pub accept_once: bool,
    /// The host socket is connected to a proxy instead of the guest's destination.
    pub via_proxy: bool,
}

/// Which side opened the flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The guest connected out, or sent the first datagram.
    Guest,
    /// A host connection was accepted on behalf of the guest.
    Host,
}

/// One flow.
///
/// The extension slot `ext` belongs to the protocol module driving the guest side of the flow,
/// for example TCP sequence and retransmission state. It is never interpreted here.
#[derive(Debug)]
pub struct VirtualSocket<X = ()> {
    pub(crate) identity: Identity,
    pub(crate) host: Option<HostFd>,
    pub(crate) flags: Flags,
    pub(crate) origin: Origin,
    pub(crate) machine: Machine,
    pub(crate) shaping: Shaping,
    pub(crate) expires: Expiration,
    /// Host to guest.
    pub(crate) recv: SocketBuffer,
    /// Guest to host.
    pub(crate) send: SocketBuffer,
    /// Urgent bytes at the head of the send buffer.
    pub(crate) urgent: usize,
    pub(crate) tos: u8,
    /// The echo identifier chosen by the guest, for ping flows.
    pub(crate) icmp_ident: Option<u16>,
    /// The host's end of stream has been passed on to the guest.
    pub(crate) eof_signalled: bool,
    /// Protocol specific state of the guest side.
    pub ext: X,
}

impl<X: Default> VirtualSocket<X> {
    /// A fresh socket in the idle state, without host binding.
    ///
    /// Datagram flows relay packet by packet and get buffers of zero capacity.
    pub fn new(tuple: FlowTuple, recv_capacity: usize, send_capacity: usize) -> Self {
        let (recv_capacity, send_capacity) = if tuple.protocol.is_stream() {
            (recv_capacity, send_capacity)
        } else {
            (0, 0)
        };

        VirtualSocket {
            identity: Identity {
                tuple,
                host_local: None,
                host_foreign: None,
            },
            host: NO_HOST_BINDING,
            flags: Flags::default(),
            origin: Origin::Guest,
            machine: Machine::new(),
            shaping: Shaping::default(),
            expires: Expiration::Never,
            recv: SocketBuffer::new(recv_capacity),
            send: SocketBuffer::new(send_capacity),
            urgent: 0,
            tos: 0,
            icmp_ident: None,
            eof_signalled: false,
            ext: X::default(),
        }
    }
}

impl<X> VirtualSocket<X> {
    /// The flow as seen by the guest.
    pub fn tuple(&self) -> &FlowTuple {
        &self.identity.tuple
    }

    /// All addresses of the flow.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The transport protocol.
    pub fn protocol(&self) -> Protocol {
        self.identity.tuple.protocol
    }

    /// The address family.
    pub fn family(&self) -> Family {
        self.identity.tuple.family()
    }

    /// Check if this is an IPv6 flow.
    pub fn is_ipv6(&self) -> bool {
        self.family() == Family::V6
    }

    /// The host socket, `None` while unbound.
    pub fn host(&self) -> Option<HostFd> {
        self.host
    }

    /// The flow markers.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Which side opened the flow.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The connection state machine.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// The connect progress.
    pub fn connect(&self) -> Connect {
        self.machine.connect()
    }

    /// The current phase, accounting for received data not yet delivered.
    pub fn phase(&self) -> Phase {
        self.machine.phase(!self.recv.is_empty())
    }

    /// Check if the socket is listening for host connections.
    pub fn is_listening(&self) -> bool {
        self.connect() == Connect::Listening
    }

    /// Queue accounting towards the guest.
    pub fn shaping(&self) -> &Shaping {
        &self.shaping
    }

    /// The queue new packets of this flow go to.
    pub fn queue_class(&self) -> QueueClass {
        self.shaping.class()
    }

    /// When the flow may be reclaimed.
    pub fn expires(&self) -> Expiration {
        self.expires
    }

    /// Data received from the host, not yet delivered to the guest.
    pub fn recv_buffer(&self) -> &SocketBuffer {
        &self.recv
    }

    /// Data from the guest, not yet written to the host.
    pub fn send_buffer(&self) -> &SocketBuffer {
        &self.send
    }

    /// Pending urgent bytes at the head of the send buffer.
    pub fn urgent(&self) -> usize {
        self.urgent
    }

    /// The type-of-service byte of the flow.
    pub fn tos(&self) -> u8 {
        self.tos
    }

    /// The guest's echo identifier of a ping flow.
    pub fn icmp_ident(&self) -> Option<u16> {
        self.icmp_ident
    }

    /// Push the deadline out by `idle` from `now`.
    pub(crate) fn refresh(&mut self, now: Instant, idle: Duration) {
        self.expires = Expiration::When(now + idle);
    }
}
