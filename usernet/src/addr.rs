//! Flow identities.
//!
//! A flow is named from the guest's point of view: the *local* address is the guest's end of the
//! connection and the *foreign* address is the host on the real network that the guest talks to.
//! The host-facing pair (the real socket's own address and the effective peer) is kept separately
//! on the socket since it may differ after translation.
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// The transport protocol of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// A byte stream with connection state.
    Tcp,
    /// Datagrams, addressed per packet.
    Udp,
    /// ICMP echo, relayed through an unprivileged datagram ping socket.
    Icmp,
}

/// The address family of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

/// The kind of host socket backing a protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A stream socket.
    Stream,
    /// A datagram socket.
    Datagram,
    /// A datagram socket speaking ICMP echo.
    Ping,
}

/// The identity of a flow as seen by the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowTuple {
    /// The transport protocol.
    pub protocol: Protocol,
    /// The guest's end of the flow.
    pub local: SocketAddr,
    /// The remote end of the flow.
    pub foreign: SocketAddr,
}

impl Protocol {
    /// The host socket kind that relays this protocol.
    pub fn kind(self) -> Kind {
        match self {
            Protocol::Tcp => Kind::Stream,
            Protocol::Udp => Kind::Datagram,
            Protocol::Icmp => Kind::Ping,
        }
    }

    /// Check if the protocol has connection state.
    pub fn is_stream(self) -> bool {
        self == Protocol::Tcp
    }
}

impl Family {
    /// The family of an address.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Family::V4,
            SocketAddr::V6(_) => Family::V6,
        }
    }

    /// The unspecified address of this family.
    pub fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => Ipv4Addr::UNSPECIFIED.into(),
            Family::V6 => Ipv6Addr::UNSPECIFIED.into(),
        }
    }

    /// The loopback address of this family.
    pub fn loopback(self) -> IpAddr {
        match self {
            Family::V4 => Ipv4Addr::LOCALHOST.into(),
            Family::V6 => Ipv6Addr::LOCALHOST.into(),
        }
    }
}

impl FlowTuple {
    /// Create a tuple.
    pub fn new(protocol: Protocol, local: SocketAddr, foreign: SocketAddr) -> Self {
        FlowTuple { protocol, local, foreign }
    }

    /// The address family, determined by the foreign address.
    pub fn family(&self) -> Family {
        Family::of(&self.foreign)
    }

    /// Check if a listener with this tuple accepts the flow `other`.
    ///
    /// The foreign address of a listener is unspecified with port zero and matches any remote.
    pub(crate) fn accepts(&self, other: &FlowTuple) -> bool {
        self.protocol == other.protocol
            && self.local == other.local
            && is_wildcard(&self.foreign)
    }
}

/// Check if an address is the wildcard for any remote.
pub fn is_wildcard(addr: &SocketAddr) -> bool {
    addr.ip().is_unspecified() && addr.port() == 0
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        })
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} <-> {}", self.protocol, self.local, self.foreign)
    }
}
