//! Errors of the socket layer.
//!
//! Every error is scoped to at most one flow. None of them is a reason to stop the reactor, the
//! worst outcome is that the flow concerned is torn down.
use core::fmt;

use crate::host::Errno;

/// Result type alias using the socket layer's `Error`.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of flow operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The send buffer has not enough room for the offered data.
    ///
    /// This is backpressure, not a failure. Nothing was buffered. The caller must hold on to the
    /// data and offer it again once the buffer drained, or throttle the guest.
    BufferFull,

    /// Connecting the host socket failed.
    ///
    /// The flow has been torn down. The caller should present an appropriate failure to the
    /// guest, typically a reset.
    ConnectFailed(Errno),

    /// The host socket failed with a hard error.
    ///
    /// The flow has been torn down.
    Io(Errno),

    /// The operation is not permitted in the current state of the flow.
    ///
    /// Returned for malformed transition requests such as data on a flow that was never
    /// connected, data after the guest half-closed, or any operation on a closed flow.
    Illegal,

    /// There were not enough resources to create a new flow.
    ///
    /// Either the socket table is full or the host refused to create another socket. Existing
    /// flows are unaffected.
    Exhausted,

    /// The key does not refer to a live socket.
    ///
    /// Notably returned when freeing a socket a second time.
    Stale,
}

impl Error {
    /// Check if the flow concerned has been torn down due to the error.
    pub fn is_flow_fatal(self) -> bool {
        matches!(self, Error::ConnectFailed(_) | Error::Io(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BufferFull => write!(f, "send buffer full"),
            Error::ConnectFailed(errno) => write!(f, "host connect failed: {}", errno),
            Error::Io(errno) => write!(f, "host socket error: {}", errno),
            Error::Illegal => write!(f, "operation not permitted in flow state"),
            Error::Exhausted => write!(f, "out of flow resources"),
            Error::Stale => write!(f, "no such socket"),
        }
    }
}

impl std::error::Error for Error {}
