//! Containers managing the storage of the socket layer.
//!
//! Sockets refer to each other and are referred to by the reactor only through keys of a
//! [`SlotMap`], never through references. Removal therefore can not leave anything dangling, a
//! stale key simply fails to resolve.
//!
//! [`SlotMap`]: slotmap/struct.SlotMap.html
pub mod slotmap;

pub use self::slotmap::{Key, SlotMap};
