//! The socket layer of a user-mode NAT for isolated guests.
//!
//! A guest without network of its own sends packets to a virtual gateway. Every flow it opens
//! through that gateway, be it a TCP stream, a UDP exchange or an echo request, is carried out on
//! the host by an ordinary host socket. This crate is the part in between: the per-flow state, the
//! buffers between the guest's packets and the host's byte streams, and the reactor that moves data
//! when either side is ready. Decoding the guest's packets and building the replies is left to a
//! framing layer on top.
//!
//! ## Table of contents
//!
//! 1. [Design](#design)
//! 2. [The engine](engine/index.html)
//!    1. [Address translation](engine/translate/index.html)
//! 3. [Virtual sockets](socket/index.html)
//!    1. [Connection state](socket/state/index.html)
//!    1. [Queue shaping](socket/queue/index.html)
//! 4. [Host sockets](host/index.html)
//!    1. [The libc host](host/sys/index.html)
//!    1. [A scripted host for tests](host/loopback/index.html)
//! 5. Internals
//!    1. [The managed module](managed/index.html)
//!    2. [The storage module](storage/index.html)
//!
//! ## Design
//!
//! All flows live in one table owned by an [`Engine`] and are referred to by generational keys.
//! A key outlives its socket harmlessly: using it afterwards is an error instead of touching
//! whatever socket took over the slot. The engine runs on a single thread, host sockets are never
//! blocking and a wait for readiness is bounded by the next flow deadline.
//!
//! Memory is allocated when a flow is created and not afterwards. Each stream has fixed size
//! receive and send rings and data received from the host is handed to the guest as (at most two)
//! slices straight out of the ring, without intermediate copies.
//!
//! The operating system is behind the [`Provider`] trait. Real sockets come from [`System`], the
//! tests run against the in-memory [`Loopback`] host instead.
//!
//! [`Engine`]: engine/struct.Engine.html
//! [`Provider`]: host/trait.Provider.html
//! [`System`]: host/sys/struct.System.html
//! [`Loopback`]: host/loopback/struct.Loopback.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![deny(unsafe_code)]

#[macro_use] mod macros;
pub mod addr;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod managed;
pub mod socket;
pub mod storage;
pub mod time;

pub use self::addr::{Family, FlowTuple, Protocol};
pub use self::config::Config;
pub use self::engine::{Egress, Engine, GuestPacket, Segment, Signal};
pub use self::error::{Error, Result};
pub use self::socket::SocketKey;
