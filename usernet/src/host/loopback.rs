//! A scripted in-memory host.
//!
//! Simulates the remote side of every host socket without touching the operating system. The
//! script is driven through the inspection methods: push bytes or datagrams as if a remote sent
//! them, finish a stream, queue an incoming connection on a listener, and read back whatever the
//! socket layer wrote.
//!
//! Asynchronous connects complete on the next readiness wait unless the destination was marked as
//! refusing (the connect then fails with `ECONNREFUSED`) or as stalled (it never completes).
use std::collections::{BTreeMap, VecDeque};
use std::io::{IoSlice, IoSliceMut};
use std::net::SocketAddr;

use super::{Connecting, Errno, Event, HostFd, Provider, Readiness, Registration, Shutdown};
use crate::addr::{Family, Kind};
use crate::time::Duration;

/// The simulated host.
#[derive(Debug, Default)]
pub struct Loopback {
    next_fd: i32,
    next_port: u16,
    sockets: BTreeMap<HostFd, Endpoint>,
    refused: Vec<SocketAddr>,
    stalled: Vec<SocketAddr>,
    closed: Vec<HostFd>,
    polls: usize,
}

/// Connection progress of a simulated socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Created, neither connected nor listening.
    Idle,
    /// An asynchronous connect is pending.
    Connecting,
    /// Connected to `Endpoint::remote`.
    Connected,
    /// Listening for connections.
    Listening,
}

/// One simulated host socket and its remote.
#[derive(Debug)]
pub struct Endpoint {
    /// The family it was opened with.
    pub family: Family,
    /// The kind it was opened with.
    pub kind: Kind,
    /// Connection progress.
    pub progress: Progress,
    /// The bound local address.
    pub local: Option<SocketAddr>,
    /// The connected remote address.
    pub remote: Option<SocketAddr>,
    /// Bytes sent by the remote, not yet read.
    pub inbound: VecDeque<u8>,
    /// The remote finished sending.
    pub inbound_eof: bool,
    /// Out-of-band bytes sent by the remote.
    pub urgent_in: VecDeque<u8>,
    /// Bytes written by the socket layer.
    pub outbound: Vec<u8>,
    /// Out-of-band bytes written by the socket layer.
    pub urgent_out: Vec<u8>,
    /// Bytes the remote will still accept, `None` for unlimited.
    pub write_limit: Option<usize>,
    /// Datagrams from remotes, not yet received.
    pub datagrams_in: VecDeque<(SocketAddr, Vec<u8>)>,
    /// Datagrams sent by the socket layer.
    pub datagrams_out: Vec<(SocketAddr, Vec<u8>)>,
    /// Remotes waiting to be accepted.
    pub backlog: VecDeque<SocketAddr>,
    /// Fails the next read or write with this errno.
    pub hard_error: Option<Errno>,
    /// Reported once by `take_error`.
    pub pending_error: Option<Errno>,
    /// Directions shut down by the socket layer.
    pub shut_write: bool,
    /// See `shut_write`.
    pub shut_read: bool,
    /// The last type-of-service set.
    pub tos: Option<u8>,
}

impl Loopback {
    /// Create a host without sockets.
    pub fn new() -> Self {
        Loopback {
            next_fd: 3,
            next_port: 40000,
            ..Loopback::default()
        }
    }

    /// Connections to `addr` will be refused.
    pub fn refuse(&mut self, addr: SocketAddr) {
        self.refused.push(addr);
    }

    /// Connections to `addr` will never complete.
    pub fn stall(&mut self, addr: SocketAddr) {
        self.stalled.push(addr);
    }

    /// Inspect a socket.
    pub fn endpoint(&self, fd: HostFd) -> Option<&Endpoint> {
        self.sockets.get(&fd)
    }

    /// Modify a socket.
    pub fn endpoint_mut(&mut self, fd: HostFd) -> Option<&mut Endpoint> {
        self.sockets.get_mut(&fd)
    }

    /// Find the open socket connected or sending to a remote.
    pub fn find(&self, remote: SocketAddr) -> Option<HostFd> {
        self.sockets.iter()
            .find(|(_, ep)| ep.remote == Some(remote)
                || ep.datagrams_out.iter().any(|(to, _)| *to == remote))
            .map(|(fd, _)| *fd)
    }

    /// Check if a handle is open.
    pub fn is_open(&self, fd: HostFd) -> bool {
        self.sockets.contains_key(&fd)
    }

    /// The number of open handles.
    pub fn open_count(&self) -> usize {
        self.sockets.len()
    }

    /// All handles closed so far, in order.
    pub fn closed(&self) -> &[HostFd] {
        &self.closed
    }

    /// The number of readiness waits performed.
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// The remote sends bytes on a stream.
    pub fn push(&mut self, fd: HostFd, data: &[u8]) {
        if let Some(ep) = self.sockets.get_mut(&fd) {
            ep.inbound.extend(data);
        }
    }

    /// The remote sends out-of-band bytes on a stream.
    pub fn push_urgent(&mut self, fd: HostFd, data: &[u8]) {
        if let Some(ep) = self.sockets.get_mut(&fd) {
            ep.urgent_in.extend(data);
        }
    }

    /// The remote closes its sending direction.
    pub fn finish(&mut self, fd: HostFd) {
        if let Some(ep) = self.sockets.get_mut(&fd) {
            ep.inbound_eof = true;
        }
    }

    /// A remote sends a datagram.
    pub fn push_datagram(&mut self, fd: HostFd, from: SocketAddr, data: &[u8]) {
        if let Some(ep) = self.sockets.get_mut(&fd) {
            ep.datagrams_in.push_back((from, data.to_vec()));
        }
    }

    /// A remote connects to a listener.
    pub fn incoming(&mut self, listener: HostFd, from: SocketAddr) {
        if let Some(ep) = self.sockets.get_mut(&listener) {
            ep.backlog.push_back(from);
        }
    }

    fn ephemeral(&mut self, family: Family) -> SocketAddr {
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(40000);
        SocketAddr::new(family.unspecified(), port)
    }

    fn get(&mut self, fd: HostFd) -> Result<&mut Endpoint, Errno> {
        self.sockets.get_mut(&fd).ok_or(Errno(libc::EBADF))
    }

    fn readiness(ep: &Endpoint) -> Readiness {
        let stream_readable = match ep.progress {
            Progress::Connected => !ep.inbound.is_empty() || ep.inbound_eof,
            Progress::Listening => !ep.backlog.is_empty(),
            _ => false,
        };

        let writable = match ep.progress {
            Progress::Connecting => ep.pending_error.is_some(),
            Progress::Connected => ep.kind == Kind::Stream
                && !ep.shut_write
                && ep.write_limit != Some(0),
            Progress::Idle => ep.kind != Kind::Stream,
            Progress::Listening => false,
        };

        Readiness {
            readable: stream_readable || !ep.datagrams_in.is_empty() || ep.hard_error.is_some(),
            writable,
            urgent: !ep.urgent_in.is_empty(),
            error: ep.hard_error.is_some() || ep.pending_error.is_some(),
        }
    }
}

impl Endpoint {
    fn new(family: Family, kind: Kind) -> Self {
        Endpoint {
            family,
            kind,
            progress: Progress::Idle,
            local: None,
            remote: None,
            inbound: VecDeque::new(),
            inbound_eof: false,
            urgent_in: VecDeque::new(),
            outbound: Vec::new(),
            urgent_out: Vec::new(),
            write_limit: None,
            datagrams_in: VecDeque::new(),
            datagrams_out: Vec::new(),
            backlog: VecDeque::new(),
            hard_error: None,
            pending_error: None,
            shut_write: false,
            shut_read: false,
            tos: None,
        }
    }

    fn take_hard_error(&mut self) -> Result<(), Errno> {
        match self.hard_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Provider for Loopback {
    fn open(&mut self, family: Family, kind: Kind) -> Result<HostFd, Errno> {
        let fd = HostFd(self.next_fd);
        self.next_fd += 1;
        self.sockets.insert(fd, Endpoint::new(family, kind));
        Ok(fd)
    }

    fn connect(&mut self, fd: HostFd, addr: SocketAddr) -> Result<Connecting, Errno> {
        let local = self.ephemeral(Family::of(&addr));
        let refused = self.refused.contains(&addr);
        let ep = self.get(fd)?;
        if ep.progress != Progress::Idle {
            return Err(Errno(libc::EISCONN));
        }

        ep.local = Some(local);
        ep.remote = Some(addr);
        ep.progress = Progress::Connecting;
        if refused {
            ep.pending_error = Some(Errno(libc::ECONNREFUSED));
        }
        Ok(Connecting::InProgress)
    }

    fn take_error(&mut self, fd: HostFd) -> Result<Option<Errno>, Errno> {
        Ok(self.get(fd)?.pending_error.take())
    }

    fn listen(&mut self, fd: HostFd, addr: SocketAddr) -> Result<SocketAddr, Errno> {
        let bound = if addr.port() == 0 {
            let mut ephemeral = self.ephemeral(Family::of(&addr));
            ephemeral.set_ip(addr.ip());
            ephemeral
        } else {
            addr
        };

        let taken = self.sockets.values()
            .any(|ep| ep.progress == Progress::Listening && ep.local == Some(bound));
        if taken {
            return Err(Errno(libc::EADDRINUSE));
        }

        let ep = self.get(fd)?;
        ep.local = Some(bound);
        ep.progress = Progress::Listening;
        Ok(bound)
    }

    fn accept(&mut self, fd: HostFd) -> Result<(HostFd, SocketAddr), Errno> {
        let listener = self.get(fd)?;
        let (family, local) = (listener.family, listener.local);
        let remote = listener.backlog.pop_front().ok_or(Errno(libc::EAGAIN))?;

        let conn = self.open(family, Kind::Stream)?;
        let ep = self.get(conn)?;
        ep.local = local;
        ep.remote = Some(remote);
        ep.progress = Progress::Connected;
        Ok((conn, remote))
    }

    fn local_addr(&mut self, fd: HostFd) -> Result<SocketAddr, Errno> {
        let ep = self.get(fd)?;
        let family = ep.family;
        Ok(ep.local.unwrap_or_else(|| SocketAddr::new(family.unspecified(), 0)))
    }

    fn set_tos(&mut self, fd: HostFd, tos: u8) -> Result<(), Errno> {
        self.get(fd)?.tos = Some(tos);
        Ok(())
    }

    fn read(&mut self, fd: HostFd, bufs: &mut [IoSliceMut<'_>]) -> Result<usize, Errno> {
        let ep = self.get(fd)?;
        ep.take_hard_error()?;
        if ep.progress != Progress::Connected {
            return Err(Errno(libc::ENOTCONN));
        }
        if ep.inbound.is_empty() {
            return if ep.inbound_eof || ep.shut_read {
                Ok(0)
            } else {
                Err(Errno(libc::EAGAIN))
            };
        }

        let mut count = 0;
        for buf in bufs.iter_mut() {
            let take = buf.len().min(ep.inbound.len());
            for (slot, byte) in buf[..take].iter_mut().zip(ep.inbound.drain(..take)) {
                *slot = byte;
            }
            count += take;
        }
        Ok(count)
    }

    fn read_urgent(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<usize, Errno> {
        let ep = self.get(fd)?;
        if ep.urgent_in.is_empty() {
            return Err(Errno(libc::EINVAL));
        }
        let take = buf.len().min(ep.urgent_in.len());
        for (slot, byte) in buf[..take].iter_mut().zip(ep.urgent_in.drain(..take)) {
            *slot = byte;
        }
        Ok(take)
    }

    fn write(&mut self, fd: HostFd, bufs: &[IoSlice<'_>]) -> Result<usize, Errno> {
        let ep = self.get(fd)?;
        ep.take_hard_error()?;
        match ep.progress {
            Progress::Connected => (),
            Progress::Connecting => return Err(Errno(libc::EAGAIN)),
            _ => return Err(Errno(libc::ENOTCONN)),
        }
        if ep.shut_write {
            return Err(Errno(libc::EPIPE));
        }

        let mut limit = ep.write_limit.unwrap_or(usize::MAX);
        if limit == 0 {
            return Err(Errno(libc::EAGAIN));
        }

        let mut count = 0;
        for buf in bufs {
            let take = buf.len().min(limit);
            ep.outbound.extend_from_slice(&buf[..take]);
            limit -= take;
            count += take;
        }
        if let Some(remaining) = ep.write_limit.as_mut() {
            *remaining -= count;
        }
        Ok(count)
    }

    fn write_urgent(&mut self, fd: HostFd, buf: &[u8]) -> Result<usize, Errno> {
        let ep = self.get(fd)?;
        if ep.progress != Progress::Connected {
            return Err(Errno(libc::ENOTCONN));
        }
        ep.urgent_out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn shutdown(&mut self, fd: HostFd, how: Shutdown) -> Result<(), Errno> {
        let ep = self.get(fd)?;
        match how {
            Shutdown::Write => ep.shut_write = true,
            Shutdown::Read => ep.shut_read = true,
            Shutdown::Both => {
                ep.shut_write = true;
                ep.shut_read = true;
            },
        }
        Ok(())
    }

    fn send_to(&mut self, fd: HostFd, buf: &[u8], addr: SocketAddr) -> Result<usize, Errno> {
        let local = self.ephemeral(Family::of(&addr));
        let ep = self.get(fd)?;
        ep.take_hard_error()?;
        ep.local.get_or_insert(local);
        ep.datagrams_out.push((addr, buf.to_vec()));
        Ok(buf.len())
    }

    fn recv_from(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<(usize, SocketAddr), Errno> {
        let ep = self.get(fd)?;
        ep.take_hard_error()?;
        let (from, data) = ep.datagrams_in.pop_front().ok_or(Errno(libc::EAGAIN))?;
        // Excess bytes of a datagram are discarded, as with a real socket.
        let take = buf.len().min(data.len());
        buf[..take].copy_from_slice(&data[..take]);
        Ok((take, from))
    }

    fn close(&mut self, fd: HostFd) {
        if self.sockets.remove(&fd).is_some() {
            self.closed.push(fd);
        }
    }

    fn poll(
        &mut self,
        registrations: &[Registration],
        events: &mut Vec<Event>,
        _: Option<Duration>,
    ) -> Result<(), Errno> {
        self.polls += 1;
        events.clear();

        // Pending connects are answered by the remote between two waits.
        let stalled = &self.stalled;
        for ep in self.sockets.values_mut() {
            let answered = ep.remote.map_or(false, |remote| !stalled.contains(&remote));
            if ep.progress == Progress::Connecting && ep.pending_error.is_none() && answered {
                ep.progress = Progress::Connected;
            }
        }

        for reg in registrations {
            let ep = match self.sockets.get(&reg.fd) {
                Some(ep) => ep,
                None => continue,
            };

            let ready = Loopback::readiness(ep);
            let readiness = Readiness {
                readable: ready.readable && reg.interest.readable,
                writable: ready.writable && reg.interest.writable,
                urgent: ready.urgent && reg.interest.urgent,
                error: ready.error,
            };

            if readiness != Readiness::default() {
                events.push(Event { token: reg.token, readiness });
            }
        }

        Ok(())
    }
}
