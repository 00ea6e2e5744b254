//! Reclaiming idle and stuck flows.
//!
//! Flows waiting for their connection use the short deadline, everything else the long one which
//! is pushed out by every successful read or write. Listeners never expire.
use crate::host::Provider;
use crate::socket::SocketKey;
use crate::time::Instant;

use super::{Egress, Engine, Signal};

impl<P: Provider, X: Default> Engine<P, X> {
    /// Close and free every flow past its deadline at the last tick.
    ///
    /// Each one is reported to the egress as `Signal::Expired`. Returns the number of flows
    /// reclaimed.
    pub fn sweep<E: Egress + ?Sized>(&mut self, egress: &mut E) -> usize {
        let now = self.now;
        let expired: Vec<SocketKey> = self.table.iter()
            .filter(|(_, socket)| socket.expires.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        for &key in &expired {
            if let Some(socket) = self.table.get(key) {
                net_debug!("{}: expired in {:?} at {}", socket.tuple(), socket.phase(), now);
            }
            if self.free(key).is_ok() {
                egress.notify(key, Signal::Expired);
            }
        }

        expired.len()
    }

    /// The earliest deadline of all flows.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.table.iter()
            .filter_map(|(_, socket)| socket.expires.instant())
            .min()
    }
}
