//! The connection state machine.
//!
//! Connect progress is a single enum, so a socket can not be listening and connected at the same
//! time. The two directions of a stream close independently and are tracked as two flags next to
//! it. The phase reported to users ([`Phase`]) is derived from both plus the fill level of the
//! receive buffer, which decides whether a remotely closed flow still has data to drain.
//!
//! All transitions are methods of [`Machine`] that validate the current state. A request that does
//! not fit the current state is rejected with `Error::Illegal` and leaves the machine untouched.
//! `Closed` is terminal, only `abort` is accepted there.
//!
//! [`Phase`]: enum.Phase.html
//! [`Machine`]: struct.Machine.html
use crate::error::{Error, Result};

/// Connect progress of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Connect {
    /// Freshly created, nothing happened yet.
    Idle,
    /// Accepting connections from the host network.
    Listening,
    /// A connection is being set up.
    Connecting,
    /// The connection is established, possibly half-closed.
    Connected,
    /// Terminal, the host socket is released.
    Closed,
}

/// The externally visible phase of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Created but neither connecting nor listening.
    Idle,
    /// See `Connect::Listening`.
    Listening,
    /// See `Connect::Connecting`.
    Connecting,
    /// Established in both directions.
    Connected,
    /// The guest will send no more data, the host may still.
    ///
    /// Also reported after both sides finished while guest data is still being written to the host.
    HalfClosedLocal,
    /// The host will send no more data and everything it sent has been delivered.
    HalfClosedRemote,
    /// The host will send no more data, buffered data is still being delivered.
    Draining,
    /// Terminal.
    Closed,
}

/// Connect progress plus the half-close flags of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Machine {
    connect: Connect,
    /// The guest finished sending, the host peer can't receive more.
    local_closed: bool,
    /// The host peer finished sending, we can't receive more.
    remote_closed: bool,
    /// The host side of `local_closed` still waits for the send buffer to drain.
    write_drain: bool,
}

impl Machine {
    /// A machine in the `Idle` state.
    pub fn new() -> Self {
        Machine {
            connect: Connect::Idle,
            local_closed: false,
            remote_closed: false,
            write_drain: false,
        }
    }

    /// The connect progress.
    pub fn connect(&self) -> Connect {
        self.connect
    }

    /// The phase, given whether undelivered received data remains.
    pub fn phase(&self, recv_pending: bool) -> Phase {
        match self.connect {
            Connect::Idle => Phase::Idle,
            Connect::Listening => Phase::Listening,
            Connect::Connecting => Phase::Connecting,
            Connect::Closed => Phase::Closed,
            Connect::Connected => match (self.local_closed, self.remote_closed) {
                (false, false) => Phase::Connected,
                (true, false) => Phase::HalfClosedLocal,
                (_, true) if recv_pending => Phase::Draining,
                (false, true) => Phase::HalfClosedRemote,
                // Both finished but the send buffer still drains to the host.
                (true, true) => Phase::HalfClosedLocal,
            },
        }
    }

    /// Check if the machine reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.connect == Connect::Closed
    }

    /// Check if the guest finished sending.
    pub fn is_local_closed(&self) -> bool {
        self.local_closed
    }

    /// Check if the host peer finished sending.
    pub fn is_remote_closed(&self) -> bool {
        self.remote_closed
    }

    /// Check if the host write shutdown is still deferred.
    pub fn is_write_draining(&self) -> bool {
        self.write_drain
    }

    /// Start accepting connections.
    pub fn listen(&mut self) -> Result<()> {
        match self.connect {
            Connect::Idle => {
                self.connect = Connect::Listening;
                Ok(())
            },
            _ => Err(Error::Illegal),
        }
    }

    /// Start a connection, actively or by accepting one.
    pub fn connecting(&mut self) -> Result<()> {
        match self.connect {
            Connect::Idle | Connect::Listening => {
                self.connect = Connect::Connecting;
                Ok(())
            },
            _ => Err(Error::Illegal),
        }
    }

    /// The connection completed.
    pub fn connected(&mut self) -> Result<()> {
        match self.connect {
            Connect::Connecting => {
                self.connect = Connect::Connected;
                Ok(())
            },
            _ => Err(Error::Illegal),
        }
    }

    /// The connection could not be established.
    pub fn connect_failed(&mut self) -> Result<()> {
        match self.connect {
            Connect::Connecting => {
                self.connect = Connect::Closed;
                Ok(())
            },
            _ => Err(Error::Illegal),
        }
    }

    /// The host peer closed its sending direction.
    ///
    /// Repeated notifications are accepted and change nothing.
    pub fn remote_shutdown(&mut self, recv_pending: bool) -> Result<Phase> {
        match self.connect {
            Connect::Connected => {
                self.remote_closed = true;
                Ok(self.settle(recv_pending))
            },
            _ => Err(Error::Illegal),
        }
    }

    /// The guest closed its sending direction.
    ///
    /// With `send_pending` the host side shutdown is deferred until the send buffer drained, see
    /// [`write_drained`]. Allowed while still connecting, the shutdown then follows the connect.
    ///
    /// [`write_drained`]: #method.write_drained
    pub fn local_shutdown(&mut self, recv_pending: bool, send_pending: bool) -> Result<Phase> {
        match self.connect {
            Connect::Connected | Connect::Connecting if !self.local_closed => {
                self.local_closed = true;
                self.write_drain = send_pending || self.connect == Connect::Connecting;
                Ok(self.settle(recv_pending))
            },
            _ => Err(Error::Illegal),
        }
    }

    /// The deferred host write shutdown has been performed.
    pub fn write_drained(&mut self) {
        self.write_drain = false;
    }

    /// Received data was delivered, re-evaluate a draining flow.
    pub fn recv_drained(&mut self, recv_pending: bool) -> Phase {
        self.settle(recv_pending)
    }

    /// Tear down unconditionally.
    pub fn abort(&mut self) {
        self.connect = Connect::Closed;
        self.write_drain = false;
    }

    /// Close once both directions finished and nothing is left to deliver or flush.
    fn settle(&mut self, recv_pending: bool) -> Phase {
        let finished = self.connect == Connect::Connected
            && self.local_closed
            && self.remote_closed
            && !recv_pending
            && !self.write_drain;
        if finished {
            self.connect = Connect::Closed;
        }
        self.phase(recv_pending)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_open() {
        let mut machine = Machine::new();
        assert_eq!(machine.phase(false), Phase::Idle);
        machine.connecting().unwrap();
        assert_eq!(machine.phase(false), Phase::Connecting);
        machine.connected().unwrap();
        assert_eq!(machine.phase(false), Phase::Connected);
    }

    #[test]
    fn listen_is_exclusive() {
        let mut machine = Machine::new();
        machine.listen().unwrap();
        assert_eq!(machine.connected(), Err(Error::Illegal));
        assert_eq!(machine.listen(), Err(Error::Illegal));
        machine.connecting().unwrap();
        assert_eq!(machine.listen(), Err(Error::Illegal));
        assert_eq!(machine.phase(false), Phase::Connecting);
    }

    #[test]
    fn remote_close_drains() {
        let mut machine = Machine::new();
        machine.connecting().unwrap();
        machine.connected().unwrap();
        assert_eq!(machine.remote_shutdown(true), Ok(Phase::Draining));
        assert_eq!(machine.recv_drained(true), Phase::Draining);
        assert_eq!(machine.recv_drained(false), Phase::HalfClosedRemote);
        assert_eq!(machine.local_shutdown(false, false), Ok(Phase::Closed));
        assert!(machine.is_closed());
    }

    #[test]
    fn both_closed_waits_for_delivery() {
        let mut machine = Machine::new();
        machine.connecting().unwrap();
        machine.connected().unwrap();
        assert_eq!(machine.local_shutdown(true, false), Ok(Phase::HalfClosedLocal));
        assert_eq!(machine.remote_shutdown(true), Ok(Phase::Draining));
        assert!(!machine.is_closed());
        assert_eq!(machine.recv_drained(false), Phase::Closed);
    }

    #[test]
    fn write_drain_defers_close() {
        let mut machine = Machine::new();
        machine.connecting().unwrap();
        machine.connected().unwrap();
        machine.remote_shutdown(false).unwrap();
        assert_eq!(machine.local_shutdown(false, true), Ok(Phase::HalfClosedLocal));
        assert!(machine.is_write_draining());
        assert!(!machine.is_closed());
        assert_eq!(machine.phase(true), Phase::Draining);
        machine.write_drained();
        assert_eq!(machine.recv_drained(false), Phase::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let mut machine = Machine::new();
        machine.connecting().unwrap();
        machine.connect_failed().unwrap();
        assert_eq!(machine.phase(false), Phase::Closed);
        assert_eq!(machine.connecting(), Err(Error::Illegal));
        assert_eq!(machine.connected(), Err(Error::Illegal));
        assert_eq!(machine.remote_shutdown(false), Err(Error::Illegal));
        assert_eq!(machine.local_shutdown(false, false), Err(Error::Illegal));
    }

    #[test]
    fn local_shutdown_once() {
        let mut machine = Machine::new();
        machine.connecting().unwrap();
        machine.connected().unwrap();
        machine.local_shutdown(false, false).unwrap();
        assert_eq!(machine.local_shutdown(false, false), Err(Error::Illegal));
    }
}
