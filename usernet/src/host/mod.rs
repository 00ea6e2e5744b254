//! The host socket capability.
//!
//! The socket layer never talks to the operating system directly. It drives a [`Provider`] that
//! offers non-blocking stream and datagram sockets addressed by opaque [`HostFd`] handles, plus a
//! readiness wait over many of them at once. Two providers are included:
//!
//! * [`sys::System`], backed by `libc` sockets and `poll(2)`.
//! * [`loopback::Loopback`], a scripted in-memory host for tests and simulations.
//!
//! Failures are reported as raw [`Errno`] values. Transient ones (would-block, interrupted,
//! connect in progress) are recognised by [`Errno::is_transient`] and never escape the data path
//! as errors.
//!
//! [`Provider`]: trait.Provider.html
//! [`HostFd`]: struct.HostFd.html
//! [`Errno`]: struct.Errno.html
//! [`Errno::is_transient`]: struct.Errno.html#method.is_transient
//! [`sys::System`]: sys/struct.System.html
//! [`loopback::Loopback`]: loopback/struct.Loopback.html
use std::io::{IoSlice, IoSliceMut};
use std::net::SocketAddr;
use std::{fmt, io};

use crate::addr::{Family, Kind};
use crate::time::Duration;

pub mod loopback;
pub mod sys;

/// An opaque host socket handle.
///
/// For the system provider this is the file descriptor. A socket without a binding stores `None`
/// instead of some sentinel value, so an unbound handle can not be used for I/O by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostFd(pub i32);

/// The host binding of a socket that has none.
pub const NO_HOST_BINDING: Option<HostFd> = None;

/// An errno value.
///
/// This is used as the error representation of host socket calls. It converts into a
/// `std::io::Error` with much more extensive error information.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

/// The outcome of starting a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Connecting {
    /// The connection was established immediately.
    Done,
    /// The connection completes asynchronously, watch for writability.
    InProgress,
}

/// Which direction of a stream to shut down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shutdown {
    /// No more writes, the peer reads end-of-file.
    Write,
    /// No more reads.
    Read,
    /// Both directions.
    Both,
}

/// The readiness conditions a handle is registered for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Interest {
    /// Wake when data (or end-of-file, or a pending accept) can be read.
    pub readable: bool,
    /// Wake when data can be written or a pending connect finished.
    pub writable: bool,
    /// Wake when out-of-band data arrived.
    pub urgent: bool,
}

/// Readiness reported for a handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Readiness {
    /// Readable, see `Interest::readable`.
    pub readable: bool,
    /// Writable, see `Interest::writable`.
    pub writable: bool,
    /// Out-of-band data is pending.
    pub urgent: bool,
    /// The handle is in an error or hang-up condition.
    pub error: bool,
}

/// A registration for one readiness wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Registration {
    /// The handle to watch.
    pub fd: HostFd,
    /// The conditions to watch for.
    pub interest: Interest,
    /// Returned with every event of this registration.
    pub token: u64,
}

/// An event from a readiness wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    /// The token of the registration.
    pub token: u64,
    /// What the handle is ready for.
    pub readiness: Readiness,
}

/// Host sockets, as consumed by the socket layer.
///
/// All handles are non-blocking. Operations that can not make progress fail with a transient
/// errno instead of blocking the reactor.
pub trait Provider {
    /// Create a socket of a family and kind.
    fn open(&mut self, family: Family, kind: Kind) -> Result<HostFd, Errno>;

    /// Start connecting a stream socket.
    fn connect(&mut self, fd: HostFd, addr: SocketAddr) -> Result<Connecting, Errno>;

    /// Retrieve and clear the pending socket error, e.g. of an asynchronous connect.
    fn take_error(&mut self, fd: HostFd) -> Result<Option<Errno>, Errno>;

    /// Bind a stream socket and start listening, returning the bound address.
    fn listen(&mut self, fd: HostFd, addr: SocketAddr) -> Result<SocketAddr, Errno>;

    /// Accept one pending connection of a listening socket.
    fn accept(&mut self, fd: HostFd) -> Result<(HostFd, SocketAddr), Errno>;

    /// The local address of a socket.
    fn local_addr(&mut self, fd: HostFd) -> Result<SocketAddr, Errno>;

    /// Set the type-of-service byte of outgoing packets.
    fn set_tos(&mut self, fd: HostFd, tos: u8) -> Result<(), Errno>;

    /// Scatter read from a stream. `Ok(0)` signals end-of-file.
    fn read(&mut self, fd: HostFd, bufs: &mut [IoSliceMut<'_>]) -> Result<usize, Errno>;

    /// Read out-of-band data from a stream.
    fn read_urgent(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<usize, Errno>;

    /// Gather write to a stream.
    fn write(&mut self, fd: HostFd, bufs: &[IoSlice<'_>]) -> Result<usize, Errno>;

    /// Write data to a stream as out-of-band data.
    fn write_urgent(&mut self, fd: HostFd, buf: &[u8]) -> Result<usize, Errno>;

    /// Shut down one or both directions of a stream.
    fn shutdown(&mut self, fd: HostFd, how: Shutdown) -> Result<(), Errno>;

    /// Send one datagram.
    fn send_to(&mut self, fd: HostFd, buf: &[u8], addr: SocketAddr) -> Result<usize, Errno>;

    /// Receive one datagram and its source.
    fn recv_from(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<(usize, SocketAddr), Errno>;

    /// Release a handle. The handle must not be used afterwards.
    fn close(&mut self, fd: HostFd);

    /// Wait until at least one registration is ready or the timeout passed.
    ///
    /// `events` is cleared and filled with the ready registrations. A provider may also return
    /// early without events, e.g. when woken from another thread.
    fn poll(
        &mut self,
        registrations: &[Registration],
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> Result<(), Errno>;
}

impl Errno {
    /// Read the errno of the last failed libc call on this thread.
    pub fn last() -> Errno {
        Errno(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    /// Check if the failure only means that no progress is possible right now.
    pub fn is_transient(self) -> bool {
        self.0 == libc::EAGAIN
            || self.0 == libc::EWOULDBLOCK
            || self.0 == libc::EINTR
            || self.0 == libc::EINPROGRESS
    }
}

impl Interest {
    /// Check if any condition is requested.
    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.urgent)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

impl From<Errno> for io::Error {
    fn from(err: Errno) -> io::Error {
        io::Error::from_raw_os_error(err.0)
    }
}

impl<P: Provider + ?Sized> Provider for &'_ mut P {
    fn open(&mut self, family: Family, kind: Kind) -> Result<HostFd, Errno> {
        (**self).open(family, kind)
    }

    fn connect(&mut self, fd: HostFd, addr: SocketAddr) -> Result<Connecting, Errno> {
        (**self).connect(fd, addr)
    }

    fn take_error(&mut self, fd: HostFd) -> Result<Option<Errno>, Errno> {
        (**self).take_error(fd)
    }

    fn listen(&mut self, fd: HostFd, addr: SocketAddr) -> Result<SocketAddr, Errno> {
        (**self).listen(fd, addr)
    }

    fn accept(&mut self, fd: HostFd) -> Result<(HostFd, SocketAddr), Errno> {
        (**self).accept(fd)
    }

    fn local_addr(&mut self, fd: HostFd) -> Result<SocketAddr, Errno> {
        (**self).local_addr(fd)
    }

    fn set_tos(&mut self, fd: HostFd, tos: u8) -> Result<(), Errno> {
        (**self).set_tos(fd, tos)
    }

    fn read(&mut self, fd: HostFd, bufs: &mut [IoSliceMut<'_>]) -> Result<usize, Errno> {
        (**self).read(fd, bufs)
    }

    fn read_urgent(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<usize, Errno> {
        (**self).read_urgent(fd, buf)
    }

    fn write(&mut self, fd: HostFd, bufs: &[IoSlice<'_>]) -> Result<usize, Errno> {
        (**self).write(fd, bufs)
    }

    fn write_urgent(&mut self, fd: HostFd, buf: &[u8]) -> Result<usize, Errno> {
        (**self).write_urgent(fd, buf)
    }

    fn shutdown(&mut self, fd: HostFd, how: Shutdown) -> Result<(), Errno> {
        (**self).shutdown(fd, how)
    }

    fn send_to(&mut self, fd: HostFd, buf: &[u8], addr: SocketAddr) -> Result<usize, Errno> {
        (**self).send_to(fd, buf, addr)
    }

    fn recv_from(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<(usize, SocketAddr), Errno> {
        (**self).recv_from(fd, buf)
    }

    fn close(&mut self, fd: HostFd) {
        (**self).close(fd)
    }

    fn poll(
        &mut self,
        registrations: &[Registration],
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> Result<(), Errno> {
        (**self).poll(registrations, events, timeout)
    }
}
