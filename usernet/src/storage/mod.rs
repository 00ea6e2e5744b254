//! Byte storage for flows.
//!
//! Each virtual socket owns one [`SocketBuffer`] per direction. The buffers never reallocate, so
//! the memory held by a flow is fixed when it is created and the number of flows bounds the
//! memory of the whole layer.
//!
//! [`SocketBuffer`]: struct.SocketBuffer.html
mod ring;

pub use self::ring::{Full, Segments, SocketBuffer};

#[cfg(test)]
mod tests;
