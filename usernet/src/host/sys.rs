#![allow(unsafe_code)]
//! Host sockets from `libc`.
//!
//! Every socket is switched to non-blocking and close-on-exec mode right after creation. The
//! readiness wait is a plain `poll(2)` over all registrations plus the read end of a wake pipe,
//! so that another thread can interrupt a wait when it hands new work to the reactor.
use std::io::{IoSlice, IoSliceMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::{mem, ptr};

use libc::{c_int, c_void, socklen_t};

use super::{Connecting, Errno, Event, HostFd, Interest, Provider, Readiness, Registration, Shutdown};
use crate::addr::{Family, Kind};
use crate::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

const LISTEN_BACKLOG: c_int = 16;

/// The host socket provider of the operating system.
pub struct System {
    wake: Arc<Pipe>,
    pollfds: Vec<libc::pollfd>,
}

/// Interrupts a readiness wait of a [`System`] from another thread.
///
/// [`System`]: struct.System.html
#[derive(Clone)]
pub struct Waker {
    pipe: Arc<Pipe>,
}

struct Pipe {
    read: c_int,
    write: c_int,
}

/// Trait for interpreting integer return values.
///
/// Failure is always signalled by `-1` for the calls used here.
trait LibcResult: Copy {
    type Ok;

    fn is_fail(self) -> bool;

    fn value(self) -> Self::Ok;

    fn errno(self) -> Result<Self::Ok, Errno> {
        if self.is_fail() {
            Err(Errno::last())
        } else {
            Ok(self.value())
        }
    }
}

#[derive(Clone, Copy)]
struct FdResult(c_int);

#[derive(Clone, Copy)]
struct IoLenResult(libc::ssize_t);

impl LibcResult for FdResult {
    type Ok = c_int;

    fn is_fail(self) -> bool {
        self.0 == -1
    }

    fn value(self) -> c_int {
        self.0
    }
}

impl LibcResult for IoLenResult {
    type Ok = usize;

    fn is_fail(self) -> bool {
        self.0 == -1
    }

    fn value(self) -> usize {
        self.0 as usize
    }
}

impl System {
    /// Create the provider and its wake pipe.
    pub fn new() -> Result<Self, Errno> {
        let mut fds = [0 as c_int; 2];
        FdResult(unsafe { libc::pipe(fds.as_mut_ptr()) }).errno()?;
        let pipe = Pipe { read: fds[0], write: fds[1] };
        set_nonblocking(pipe.read)?;
        set_nonblocking(pipe.write)?;

        Ok(System {
            wake: Arc::new(pipe),
            pollfds: Vec::new(),
        })
    }

    /// A handle that interrupts the current or next readiness wait.
    pub fn waker(&self) -> Waker {
        Waker { pipe: self.wake.clone() }
    }

    fn drain_wake(&self) {
        let mut sink = [0u8; 64];
        loop {
            let read = unsafe {
                libc::read(self.wake.read, sink.as_mut_ptr() as *mut c_void, sink.len())
            };
            if read <= 0 {
                break;
            }
        }
    }
}

impl Waker {
    /// Wake the reactor.
    pub fn wake(&self) {
        let byte = 1u8;
        // A full pipe already guarantees a wake up, so failure is fine.
        let _ = unsafe { libc::write(self.pipe.write, &byte as *const u8 as *const c_void, 1) };
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

impl Provider for System {
    fn open(&mut self, family: Family, kind: Kind) -> Result<HostFd, Errno> {
        let domain = match family {
            Family::V4 => libc::AF_INET,
            Family::V6 => libc::AF_INET6,
        };
        let (ty, protocol) = match (kind, family) {
            (Kind::Stream, _) => (libc::SOCK_STREAM, 0),
            (Kind::Datagram, _) => (libc::SOCK_DGRAM, 0),
            (Kind::Ping, Family::V4) => (libc::SOCK_DGRAM, libc::IPPROTO_ICMP),
            (Kind::Ping, Family::V6) => (libc::SOCK_DGRAM, libc::IPPROTO_ICMPV6),
        };

        let fd = FdResult(unsafe { libc::socket(domain, ty, protocol) }).errno()?;
        if let Err(err) = set_nonblocking(fd) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(HostFd(fd))
    }

    fn connect(&mut self, fd: HostFd, addr: SocketAddr) -> Result<Connecting, Errno> {
        let (storage, len) = to_sockaddr(addr);
        let res = unsafe {
            libc::connect(fd.0, &storage as *const _ as *const libc::sockaddr, len)
        };

        match FdResult(res).errno() {
            Ok(_) => Ok(Connecting::Done),
            Err(err) if err.is_transient() => Ok(Connecting::InProgress),
            Err(err) => Err(err),
        }
    }

    fn take_error(&mut self, fd: HostFd) -> Result<Option<Errno>, Errno> {
        let mut value: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;
        let res = unsafe {
            libc::getsockopt(
                fd.0,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut value as *mut c_int as *mut c_void,
                &mut len)
        };

        FdResult(res).errno()?;
        Ok(match value {
            0 => None,
            errno => Some(Errno(errno)),
        })
    }

    fn listen(&mut self, fd: HostFd, addr: SocketAddr) -> Result<SocketAddr, Errno> {
        let reuse: c_int = 1;
        FdResult(unsafe {
            libc::setsockopt(
                fd.0,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &reuse as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t)
        }).errno()?;

        let (storage, len) = to_sockaddr(addr);
        FdResult(unsafe {
            libc::bind(fd.0, &storage as *const _ as *const libc::sockaddr, len)
        }).errno()?;
        FdResult(unsafe { libc::listen(fd.0, LISTEN_BACKLOG) }).errno()?;

        self.local_addr(fd)
    }

    fn accept(&mut self, fd: HostFd) -> Result<(HostFd, SocketAddr), Errno> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        let conn = FdResult(unsafe {
            libc::accept(fd.0, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        }).errno()?;

        let accepted = set_nonblocking(conn).and_then(|_| from_sockaddr(&storage, len));
        match accepted {
            Ok(remote) => Ok((HostFd(conn), remote)),
            Err(err) => {
                unsafe { libc::close(conn) };
                Err(err)
            },
        }
    }

    fn local_addr(&mut self, fd: HostFd) -> Result<SocketAddr, Errno> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        FdResult(unsafe {
            libc::getsockname(fd.0, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        }).errno()?;
        from_sockaddr(&storage, len)
    }

    fn set_tos(&mut self, fd: HostFd, tos: u8) -> Result<(), Errno> {
        let (level, name) = match self.local_addr(fd)? {
            SocketAddr::V4(_) => (libc::IPPROTO_IP, libc::IP_TOS),
            SocketAddr::V6(_) => (libc::IPPROTO_IPV6, libc::IPV6_TCLASS),
        };

        let value = c_int::from(tos);
        FdResult(unsafe {
            libc::setsockopt(
                fd.0,
                level,
                name,
                &value as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t)
        }).errno()?;
        Ok(())
    }

    fn read(&mut self, fd: HostFd, bufs: &mut [IoSliceMut<'_>]) -> Result<usize, Errno> {
        // SAFETY: `IoSliceMut` is guaranteed to be ABI compatible with `iovec` on unix.
        IoLenResult(unsafe {
            libc::readv(fd.0, bufs.as_mut_ptr() as *const libc::iovec, bufs.len() as c_int)
        }).errno()
    }

    fn read_urgent(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<usize, Errno> {
        IoLenResult(unsafe {
            libc::recv(fd.0, buf.as_mut_ptr() as *mut c_void, buf.len(), libc::MSG_OOB)
        }).errno()
    }

    fn write(&mut self, fd: HostFd, bufs: &[IoSlice<'_>]) -> Result<usize, Errno> {
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        // SAFETY: `IoSlice` is guaranteed to be ABI compatible with `iovec` on unix. The kernel
        // only reads through the pointer despite the mutable type of the field.
        msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;
        IoLenResult(unsafe { libc::sendmsg(fd.0, &msg, SEND_FLAGS) }).errno()
    }

    fn write_urgent(&mut self, fd: HostFd, buf: &[u8]) -> Result<usize, Errno> {
        IoLenResult(unsafe {
            libc::send(fd.0, buf.as_ptr() as *const c_void, buf.len(), libc::MSG_OOB | SEND_FLAGS)
        }).errno()
    }

    fn shutdown(&mut self, fd: HostFd, how: Shutdown) -> Result<(), Errno> {
        let how = match how {
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        FdResult(unsafe { libc::shutdown(fd.0, how) }).errno()?;
        Ok(())
    }

    fn send_to(&mut self, fd: HostFd, buf: &[u8], addr: SocketAddr) -> Result<usize, Errno> {
        let (storage, len) = to_sockaddr(addr);
        IoLenResult(unsafe {
            libc::sendto(
                fd.0,
                buf.as_ptr() as *const c_void,
                buf.len(),
                SEND_FLAGS,
                &storage as *const _ as *const libc::sockaddr,
                len)
        }).errno()
    }

    fn recv_from(&mut self, fd: HostFd, buf: &mut [u8]) -> Result<(usize, SocketAddr), Errno> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        let count = IoLenResult(unsafe {
            libc::recvfrom(
                fd.0,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                0,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len)
        }).errno()?;
        Ok((count, from_sockaddr(&storage, len)?))
    }

    fn close(&mut self, fd: HostFd) {
        unsafe { libc::close(fd.0) };
    }

    fn poll(
        &mut self,
        registrations: &[Registration],
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> Result<(), Errno> {
        events.clear();
        self.pollfds.clear();
        self.pollfds.push(libc::pollfd { fd: self.wake.read, events: libc::POLLIN, revents: 0 });
        self.pollfds.extend(registrations.iter().map(|reg| libc::pollfd {
            fd: reg.fd.0,
            events: poll_events(reg.interest),
            revents: 0,
        }));

        let timeout = match timeout {
            None => -1,
            Some(duration) => duration.as_millis().min(c_int::MAX as u128) as c_int,
        };

        let res = unsafe {
            libc::poll(self.pollfds.as_mut_ptr(), self.pollfds.len() as libc::nfds_t, timeout)
        };
        match FdResult(res).errno() {
            Ok(_) => (),
            Err(err) if err.is_transient() => return Ok(()),
            Err(err) => return Err(err),
        }

        if self.pollfds[0].revents != 0 {
            self.drain_wake();
        }

        for (pollfd, reg) in self.pollfds[1..].iter().zip(registrations) {
            if pollfd.revents == 0 {
                continue;
            }
            events.push(Event {
                token: reg.token,
                readiness: readiness(pollfd.revents),
            });
        }

        Ok(())
    }
}

fn poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.readable {
        events |= libc::POLLIN;
    }
    if interest.writable {
        events |= libc::POLLOUT;
    }
    if interest.urgent {
        events |= libc::POLLPRI;
    }
    events
}

fn readiness(revents: libc::c_short) -> Readiness {
    Readiness {
        readable: revents & (libc::POLLIN | libc::POLLHUP) != 0,
        writable: revents & libc::POLLOUT != 0,
        urgent: revents & libc::POLLPRI != 0,
        error: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
    }
}

fn set_nonblocking(fd: c_int) -> Result<(), Errno> {
    let flags = FdResult(unsafe { libc::fcntl(fd, libc::F_GETFL) }).errno()?;
    FdResult(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) }).errno()?;
    let flags = FdResult(unsafe { libc::fcntl(fd, libc::F_GETFD) }).errno()?;
    FdResult(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) }).errno()?;
    Ok(())
}

fn to_sockaddr(addr: SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(addr) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = addr.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(addr.ip().octets());
            // SAFETY: `sockaddr_storage` is large and aligned enough for any socket address.
            unsafe { ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin) };
            mem::size_of::<libc::sockaddr_in>()
        },
        SocketAddr::V6(addr) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = addr.port().to_be();
            sin6.sin6_flowinfo = addr.flowinfo();
            sin6.sin6_addr.s6_addr = addr.ip().octets();
            sin6.sin6_scope_id = addr.scope_id();
            unsafe { ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6) };
            mem::size_of::<libc::sockaddr_in6>()
        },
    };
    (storage, len as socklen_t)
}

fn from_sockaddr(storage: &libc::sockaddr_storage, len: socklen_t) -> Result<SocketAddr, Errno> {
    let len = len as usize;
    match c_int::from(storage.ss_family) {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() => {
            // SAFETY: the family tag and length identify the stored address.
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddrV4::new(ip, u16::from_be(sin.sin_port)).into())
        },
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id).into())
        },
        _ => Err(Errno(libc::EAFNOSUPPORT)),
    }
}
