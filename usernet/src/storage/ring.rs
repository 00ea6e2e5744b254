use std::io::{IoSlice, IoSliceMut};

/// A fixed-capacity byte ring.
///
/// Used for both directions of a flow: the receive buffer holds bytes read from the host socket
/// that were not yet delivered to the guest, the send buffer holds guest bytes that the host
/// socket did not accept yet.
///
/// The storage is allocated once on construction. No operation ever grows it, the used length is
/// bounded by the capacity at all times and a write that does not fit either fails or is
/// truncated, depending on the method.
#[derive(Clone, PartialEq, Eq)]
pub struct SocketBuffer {
    storage: Box<[u8]>,
    /// Index of the first used byte.
    read_at: usize,
    /// Number of used bytes.
    len: usize,
}

/// The buffer does not have enough free space.
///
/// Returned by the all-or-nothing [`SocketBuffer::try_write`], the buffer is left unchanged.
///
/// [`SocketBuffer::try_write`]: struct.SocketBuffer.html#method.try_write
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Full {
    /// The number of bytes that would have fit.
    pub available: usize,
}

/// Up to two segments describing a contiguous logical region of the ring.
///
/// This is the scatter/gather view handed out for zero-copy delivery. The first segment always
/// precedes the second in stream order and the second is only non-empty when the region wraps
/// around the end of the storage.
#[derive(Clone, Copy, Debug)]
pub struct Segments<'a> {
    parts: [&'a [u8]; 2],
}

impl SocketBuffer {
    /// Create an empty buffer with fixed capacity.
    pub fn new(capacity: usize) -> Self {
        SocketBuffer {
            storage: vec![0; capacity].into_boxed_slice(),
            read_at: 0,
            len: 0,
        }
    }

    /// The fixed capacity.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if no more bytes can be buffered.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// The number of bytes that can still be buffered.
    pub fn window(&self) -> usize {
        self.capacity() - self.len
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.len = 0;
    }

    /// Append all of `data` or nothing.
    pub fn try_write(&mut self, data: &[u8]) -> Result<(), Full> {
        if data.len() > self.window() {
            return Err(Full { available: self.window() });
        }

        let written = self.write(data);
        debug_assert_eq!(written, data.len());
        Ok(())
    }

    /// Append as much of `data` as fits, returning the number of bytes taken.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let (first, second) = self.unfilled_mut();
        let head = first.len().min(data.len());
        first[..head].copy_from_slice(&data[..head]);
        let tail = second.len().min(data.len() - head);
        second[..tail].copy_from_slice(&data[head..head + tail]);
        self.commit(head + tail);
        head + tail
    }

    /// Copy buffered bytes out into `buf` and consume them.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = self.peek(buf);
        self.consume(count);
        count
    }

    /// Copy buffered bytes out into `buf` without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        for part in self.segments().iter() {
            let take = part.len().min(buf.len() - count);
            buf[count..count + take].copy_from_slice(&part[..take]);
            count += take;
        }
        count
    }

    /// Mark the first `count` buffered bytes as consumed.
    ///
    /// Consuming more than is buffered is clamped, the buffer never holds a negative amount.
    pub fn consume(&mut self, count: usize) -> usize {
        let count = count.min(self.len);
        self.len -= count;
        self.read_at = if self.len == 0 {
            // Realign so that the next fill is one contiguous segment.
            0
        } else {
            (self.read_at + count) % self.capacity()
        };
        count
    }

    /// Mark `count` bytes after the buffered region as filled.
    ///
    /// Used after writing into the regions returned by [`unfilled_mut`]. Clamped to the window.
    ///
    /// [`unfilled_mut`]: #method.unfilled_mut
    pub fn commit(&mut self, count: usize) -> usize {
        let count = count.min(self.window());
        self.len += count;
        count
    }

    /// The buffered bytes as up to two segments, in stream order.
    pub fn segments(&self) -> Segments<'_> {
        let end = self.read_at + self.len;
        if end <= self.capacity() {
            Segments { parts: [&self.storage[self.read_at..end], &[]] }
        } else {
            let wrapped = end - self.capacity();
            Segments {
                parts: [&self.storage[self.read_at..], &self.storage[..wrapped]],
            }
        }
    }

    /// The free space as up to two mutable regions, in stream order.
    ///
    /// Fill them front to back and then [`commit`] the number of bytes written.
    ///
    /// [`commit`]: #method.commit
    pub fn unfilled_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let capacity = self.capacity();
        if capacity == 0 {
            return (&mut [], &mut []);
        }

        let write_at = (self.read_at + self.len) % capacity;
        let window = self.window();
        if write_at >= self.read_at && (self.len == 0 || write_at != self.read_at) {
            // Free space runs to the end of storage and wraps to just before `read_at`.
            let (head, tail) = self.storage.split_at_mut(write_at);
            let wrap = window - tail.len().min(window);
            (tail, &mut head[..wrap])
        } else {
            (&mut self.storage[write_at..write_at + window], &mut [])
        }
    }

    /// The free space as vectored I/O buffers, for a single scatter read.
    pub fn unfilled_io(&mut self) -> [IoSliceMut<'_>; 2] {
        let (first, second) = self.unfilled_mut();
        [IoSliceMut::new(first), IoSliceMut::new(second)]
    }
}

impl<'a> Segments<'a> {
    /// Iterate the non-empty segments.
    pub fn iter(&self) -> impl Iterator<Item=&'a [u8]> + '_ {
        self.parts.iter().copied().filter(|part| !part.is_empty())
    }

    /// The number of non-empty segments.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// The total number of bytes described.
    pub fn total(&self) -> usize {
        self.parts[0].len() + self.parts[1].len()
    }

    /// Restrict the view to the first `limit` bytes.
    pub fn truncate(self, limit: usize) -> Self {
        let first = self.parts[0].len().min(limit);
        let second = self.parts[1].len().min(limit - first);
        Segments {
            parts: [&self.parts[0][..first], &self.parts[1][..second]],
        }
    }

    /// The segments as vectored I/O buffers, for a single gather write.
    pub fn io_slices(&self) -> [IoSlice<'a>; 2] {
        [IoSlice::new(self.parts[0]), IoSlice::new(self.parts[1])]
    }

    /// Copy the described bytes into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut all = Vec::with_capacity(self.total());
        self.iter().for_each(|part| all.extend_from_slice(part));
        all
    }
}

impl core::fmt::Debug for SocketBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SocketBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("read_at", &self.read_at)
            .finish()
    }
}
