use core::fmt;

use crate::addr::FlowTuple;
use crate::error::{Error, Result};
use crate::managed::{Key, SlotMap};

use super::VirtualSocket;

/// A handle to a socket in a table.
///
/// Stays valid until the socket is freed. Using it afterwards fails with `Error::Stale` or returns
/// `None`, even after the storage was reused for another socket.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketKey(Key);

/// All live sockets of an engine.
///
/// Iteration is in insertion order, which carries no meaning for delivery. Lookups by flow tuple
/// are linear but remember the last hit, as consecutive packets mostly belong to the same flow.
pub struct SocketTable<X = ()> {
    sockets: SlotMap<VirtualSocket<X>>,
    last_hit: Option<SocketKey>,
}

impl SocketKey {
    /// A compact representation, used as the readiness token of the host socket.
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }

    /// Restore a key from its compact representation.
    pub fn from_bits(bits: u64) -> Self {
        SocketKey(Key::from_bits(bits))
    }
}

impl<X> SocketTable<X> {
    /// An empty table holding at most `limit` sockets.
    pub fn new(limit: usize) -> Self {
        SocketTable {
            sockets: SlotMap::with_limit(limit),
            last_hit: None,
        }
    }

    /// The number of live sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Check if no socket is live.
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Check if the key refers to a live socket.
    pub fn contains(&self, key: SocketKey) -> bool {
        self.sockets.contains(key.0)
    }

    /// Retrieve a socket.
    pub fn get(&self, key: SocketKey) -> Option<&VirtualSocket<X>> {
        self.sockets.get(key.0)
    }

    /// Retrieve a socket mutably.
    pub fn get_mut(&mut self, key: SocketKey) -> Option<&mut VirtualSocket<X>> {
        self.sockets.get_mut(key.0)
    }

    /// Add a socket.
    ///
    /// Fails with `Error::Illegal` when another flow already has the same tuple and with
    /// `Error::Exhausted` when the table is full.
    pub fn insert(&mut self, socket: VirtualSocket<X>) -> Result<SocketKey> {
        if self.find_exact(socket.tuple()).is_some() {
            return Err(Error::Illegal);
        }

        self.sockets.insert(socket)
            .map(SocketKey)
            .map_err(|_| Error::Exhausted)
    }

    /// Remove a socket, handing it back.
    ///
    /// Returns `None` when the key is stale, for example because it was already removed.
    pub fn remove(&mut self, key: SocketKey) -> Option<VirtualSocket<X>> {
        if self.last_hit == Some(key) {
            self.last_hit = None;
        }
        self.sockets.remove(key.0)
    }

    /// Change the flow tuple of a socket, keeping tuples unique.
    pub fn retuple(&mut self, key: SocketKey, tuple: FlowTuple) -> Result<()> {
        match self.find_exact(&tuple) {
            Some(other) if other != key => return Err(Error::Illegal),
            _ => (),
        }

        let socket = self.sockets.get_mut(key.0).ok_or(Error::Stale)?;
        socket.identity.tuple = tuple;
        Ok(())
    }

    /// Find the socket handling a flow.
    ///
    /// A connected socket with exactly this tuple takes precedence over a listener. Listeners
    /// match any foreign address.
    pub fn lookup(&mut self, tuple: &FlowTuple) -> Option<SocketKey> {
        if let Some(key) = self.last_hit {
            match self.sockets.get(key.0) {
                Some(socket) if !socket.is_listening() && socket.tuple() == tuple => {
                    return Some(key);
                },
                _ => (),
            }
        }

        let found = self.find_exact(tuple)
            .or_else(|| self.find_listener(tuple));
        if found.is_some() {
            self.last_hit = found;
        }
        found
    }

    /// Find a listener by the port of its host socket.
    pub fn listener_on(&self, port: u16) -> Option<SocketKey> {
        self.iter()
            .find(|(_, socket)| {
                socket.is_listening()
                    && socket.identity.host_local.map(|addr| addr.port()) == Some(port)
            })
            .map(|(key, _)| key)
    }

    /// Iterate over all live sockets in insertion order.
    pub fn iter(&self) -> impl Iterator<Item=(SocketKey, &'_ VirtualSocket<X>)> + '_ {
        self.sockets.iter().map(|(key, socket)| (SocketKey(key), socket))
    }

    /// The keys of all live sockets in insertion order.
    pub fn keys(&self) -> Vec<SocketKey> {
        self.sockets.keys().into_iter().map(SocketKey).collect()
    }

    /// Listeners are left out, several host ports may forward to the same guest port.
    fn find_exact(&self, tuple: &FlowTuple) -> Option<SocketKey> {
        self.iter()
            .find(|(_, socket)| !socket.is_listening() && socket.tuple() == tuple)
            .map(|(key, _)| key)
    }

    fn find_listener(&self, tuple: &FlowTuple) -> Option<SocketKey> {
        self.iter()
            .find(|(_, socket)| socket.is_listening() && socket.tuple().accepts(tuple))
            .map(|(key, _)| key)
    }
}

impl fmt::Debug for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SocketKey({:#x})", self.0.to_bits())
    }
}

impl<X> fmt::Debug for SocketTable<X> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SocketTable")
            .field("len", &self.len())
            .field("limit", &self.sockets.limit())
            .finish()
    }
}
