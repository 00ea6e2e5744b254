//! Moving bytes between the buffers and the host sockets.
//!
//! All host calls are non-blocking and attempted once. A transient failure is zero progress, the
//! reactor tries again when the host socket becomes ready. A hard failure tears the flow down and
//! is returned as `Error::Io`.
use byteorder::{ByteOrder, NetworkEndian};

use crate::addr::Protocol;
use crate::error::{Error, Result};
use crate::host::{Provider, Shutdown};
use crate::socket::{Connect, SocketKey};
use crate::storage::Segments;

use super::{note_queued, Egress, Engine};

/// The outcome of one read from a host socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Progress {
    /// This many bytes were read.
    Moved(usize),
    /// Nothing available right now, or no room to put it.
    Idle,
    /// The host peer finished sending.
    Closed,
}

/// Offset of the identifier in an ICMP echo header.
const ECHO_IDENT: usize = 4;

/// Length of an ICMP echo header.
const ECHO_HEADER: usize = 8;

impl<P: Provider, X: Default> Engine<P, X> {
    /// Fill the receive buffer from the host socket.
    ///
    /// Reads directly into the free space of the buffer with one scatter read. On end of stream
    /// the flow moves on to `Draining` or `HalfClosedRemote`, whatever was buffered before is
    /// still delivered.
    pub fn read_from_peer(&mut self, key: SocketKey) -> Result<Progress> {
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if !socket.protocol().is_stream()
            || socket.connect() != Connect::Connected
            || socket.machine.is_remote_closed()
        {
            return Err(Error::Illegal);
        }
        let fd = socket.host.ok_or(Error::Illegal)?;

        if socket.recv.window() == 0 {
            return Ok(Progress::Idle);
        }

        let read = {
            let mut bufs = socket.recv.unfilled_io();
            self.provider.read(fd, &mut bufs)
        };

        match read {
            Ok(0) => {
                let phase = socket.machine.remote_shutdown(!socket.recv.is_empty())?;
                net_debug!("{}: host finished sending, now {:?}", socket.tuple(), phase);
                Ok(Progress::Closed)
            },
            Ok(count) => {
                let count = socket.recv.commit(count);
                socket.refresh(now, expire);
                Ok(Progress::Moved(count))
            },
            Err(errno) if errno.is_transient() => Ok(Progress::Idle),
            Err(errno) => Err(self.fatal(key, errno)),
        }
    }

    /// Drain the send buffer into the host socket.
    ///
    /// Pending urgent bytes go first, as out-of-band data. Returns the number of bytes the host
    /// took, a short write leaves the rest buffered. Once the buffer is empty a deferred write
    /// shutdown is performed.
    pub fn write_to_peer(&mut self, key: SocketKey) -> Result<usize> {
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if !socket.protocol().is_stream() {
            return Err(Error::Illegal);
        }
        match socket.connect() {
            Connect::Connected => (),
            Connect::Connecting => return Ok(0),
            _ => return Err(Error::Illegal),
        }
        let fd = socket.host.ok_or(Error::Illegal)?;

        let mut written = 0;
        if socket.urgent > 0 {
            let segments = socket.send.segments().truncate(socket.urgent);
            let head = segments.iter().next().unwrap_or(&[]);
            match self.provider.write_urgent(fd, head) {
                Ok(count) => {
                    let count = socket.send.consume(count);
                    socket.urgent -= count.min(socket.urgent);
                    written += count;
                },
                Err(errno) if errno.is_transient() => (),
                Err(errno) => return Err(self.fatal(key, errno)),
            }
        }

        if socket.urgent == 0 && !socket.send.is_empty() {
            let result = {
                let slices = socket.send.segments().io_slices();
                self.provider.write(fd, &slices)
            };
            match result {
                Ok(count) => written += socket.send.consume(count),
                Err(errno) if errno.is_transient() => (),
                Err(errno) => return Err(self.fatal(key, errno)),
            }
        }

        if written > 0 {
            socket.refresh(now, expire);
        }

        if socket.send.is_empty() && socket.machine.is_write_draining() {
            if let Err(errno) = self.provider.shutdown(fd, Shutdown::Write) {
                net_debug!("{}: shutdown failed: {}", socket.tuple(), errno);
            }
            socket.machine.write_drained();
            let phase = socket.machine.recv_drained(!socket.recv.is_empty());
            net_trace!("{}: send buffer drained, now {:?}", socket.tuple(), phase);
        }

        Ok(written)
    }

    /// Receive one datagram from the host socket and hand it to the guest.
    pub fn receive_from_datagram_peer<E: Egress + ?Sized>(
        &mut self,
        key: SocketKey,
        egress: &mut E,
    ) -> Result<Progress> {
        let (now, expire) = (self.now, self.config.expire);
        let downgrade_after = self.config.downgrade_after;
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if socket.protocol().is_stream() || socket.connect() != Connect::Connected {
            return Err(Error::Illegal);
        }
        let fd = socket.host.ok_or(Error::Illegal)?;

        let (count, from) = match self.provider.recv_from(fd, &mut self.scratch) {
            Ok(received) => received,
            Err(errno) if errno.is_transient() => return Ok(Progress::Idle),
            Err(errno) => return Err(self.fatal(key, errno)),
        };

        let payload = &mut self.scratch[..count];
        if socket.protocol() == Protocol::Icmp && payload.len() >= ECHO_HEADER {
            if let Some(ident) = socket.icmp_ident {
                NetworkEndian::write_u16(&mut payload[ECHO_IDENT..], ident);
            }
        }

        // Replies from the translated destination appear to come from where the guest sent to.
        let from = if Some(from) == socket.identity.host_foreign {
            socket.identity.tuple.foreign
        } else {
            from
        };

        egress.datagram(key, socket.shaping.class(), from, payload);
        note_queued(socket, downgrade_after);
        socket.refresh(now, expire);
        Ok(Progress::Moved(count))
    }

    /// Send one guest datagram to the flow's host destination.
    ///
    /// Returns the number of bytes sent, zero when the host could not take it right now. Lost
    /// datagrams are not retried.
    pub fn send_to_datagram_peer(&mut self, key: SocketKey, payload: &[u8]) -> Result<usize> {
        let (now, expire) = (self.now, self.config.expire);
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if socket.protocol().is_stream() || socket.connect() != Connect::Connected {
            return Err(Error::Illegal);
        }
        let fd = socket.host.ok_or(Error::Illegal)?;
        let target = socket.identity.host_foreign.unwrap_or(socket.identity.tuple.foreign);

        if socket.protocol() == Protocol::Icmp {
            if payload.len() < ECHO_HEADER {
                return Err(Error::Illegal);
            }
            socket.icmp_ident = Some(NetworkEndian::read_u16(&payload[ECHO_IDENT..]));
        }

        match self.provider.send_to(fd, payload, target) {
            Ok(count) => {
                socket.refresh(now, expire);
                Ok(count)
            },
            Err(errno) if errno.is_transient() => {
                net_trace!("{}: datagram dropped, host busy", socket.tuple());
                Ok(0)
            },
            Err(errno) => Err(self.fatal(key, errno)),
        }
    }

    /// The received bytes of a flow, as up to two segments, without copying.
    ///
    /// `count()` and `total()` of the result give the number of segments and bytes. Bytes are
    /// removed only by delivering them with [`flush`].
    ///
    /// [`flush`]: struct.Engine.html#method.flush
    pub fn prepare_scatter_gather(&self, key: SocketKey) -> Result<Segments<'_>> {
        let socket = self.table.get(key).ok_or(Error::Stale)?;
        Ok(socket.recv.segments())
    }

    /// Append guest bytes to the send buffer, without writing them to the host yet.
    ///
    /// All or nothing: fails with `Error::BufferFull` and leaves the buffer unchanged when the
    /// data does not fit entirely.
    pub fn refill_send_buffer(&mut self, key: SocketKey, data: &[u8]) -> Result<()> {
        let socket = self.table.get_mut(key).ok_or(Error::Stale)?;
        if !socket.protocol().is_stream() || socket.machine.is_local_closed() {
            return Err(Error::Illegal);
        }
        match socket.connect() {
            Connect::Connecting | Connect::Connected => (),
            _ => return Err(Error::Illegal),
        }

        socket.send.try_write(data).map_err(|full| {
            net_trace!("{}: send buffer full, {} of {} bytes fit",
                socket.tuple(), full.available, data.len());
            Error::BufferFull
        })
    }

    /// Read pending out-of-band data of the host and hand it to the guest.
    pub(super) fn read_urgent<E: Egress + ?Sized>(
        &mut self,
        key: SocketKey,
        egress: &mut E,
    ) -> Result<usize> {
        let socket = self.table.get(key).ok_or(Error::Stale)?;
        let fd = socket.host.ok_or(Error::Illegal)?;

        let mut urgent = [0u8; 64];
        match self.provider.read_urgent(fd, &mut urgent) {
            Ok(count) => {
                egress.urgent(key, &urgent[..count]);
                Ok(count)
            },
            // Out-of-band data already pulled inline, or none.
            Err(_) => Ok(0),
        }
    }
}
