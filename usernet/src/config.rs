//! Tunables of the socket layer.
use std::net::{IpAddr, SocketAddr};

use crate::time::Duration;

/// Configuration of an [`Engine`].
///
/// All fields are public, start from `Config::default()` and adjust what differs.
///
/// [`Engine`]: ../engine/struct.Engine.html
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the receive buffer (host to guest) of every stream flow.
    pub recv_capacity: usize,

    /// Capacity of the send buffer (guest to host) of every stream flow.
    pub send_capacity: usize,

    /// Idle deadline of established flows, refreshed on every successful read or write.
    pub expire: Duration,

    /// Deadline of flows waiting for their connection to complete.
    pub expire_fast: Duration,

    /// Packets queued towards the guest in a row, without the guest draining the flow's queue,
    /// after which the flow is moved from the interactive to the bulk queue.
    pub downgrade_after: u32,

    /// The maximum number of live sockets.
    pub max_sockets: usize,

    /// The largest datagram relayed in either direction.
    pub datagram_max: usize,

    /// Rewriting of special destinations.
    pub remap: Remap,

    /// Relay new stream flows through a proxy instead of connecting directly.
    pub proxy: Option<Proxy>,
}

/// Special destinations on the virtual network.
///
/// Each rule applies to the destination of a new flow before it is connected, the result is
/// cached on the socket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Remap {
    /// A virtual address that stands for the host itself.
    ///
    /// Flows to this address are connected to the loopback address of the same family.
    pub loopback_alias: Option<IpAddr>,

    /// A virtual resolver address and the real resolver it is redirected to.
    pub dns: Option<(IpAddr, IpAddr)>,

    /// Broadcast addresses of the virtual network, redirected to loopback.
    ///
    /// The limited broadcast `255.255.255.255` is always treated as broadcast.
    pub broadcast: Vec<IpAddr>,
}

/// A proxy for stream flows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proxy {
    /// Where to connect instead of the guest's destination.
    pub endpoint: SocketAddr,

    /// Destinations that are connected directly anyway.
    pub bypass: Vec<IpAddr>,
}

impl Config {
    /// Long idle deadline of established flows.
    pub const EXPIRE: Duration = Duration::from_millis(240_000);

    /// Deadline of flows awaiting connection completion.
    pub const EXPIRE_FAST: Duration = Duration::from_millis(10_000);
}

impl Default for Config {
    fn default() -> Self {
        Config {
            recv_capacity: 8192,
            send_capacity: 8192,
            expire: Config::EXPIRE,
            expire_fast: Config::EXPIRE_FAST,
            downgrade_after: 10,
            max_sockets: 1024,
            datagram_max: 65535,
            remap: Remap::default(),
            proxy: None,
        }
    }
}
