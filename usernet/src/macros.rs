//! Logging shims.
//!
//! All logging goes through the `net_*` macros so that the crate carries no hard dependency on a
//! logger. With the `log` feature the macros forward to the `log` facade, otherwise they only
//! evaluate (and discard) their arguments so that no variable becomes unused by accident.

#[cfg(feature = "log")]
#[macro_use]
mod log {
    macro_rules! net_log {
        (trace, $($arg:tt)*) => { ::log::trace!($($arg)*) };
        (debug, $($arg:tt)*) => { ::log::debug!($($arg)*) };
        (warn, $($arg:tt)*) => { ::log::warn!($($arg)*) };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod log {
    macro_rules! net_log {
        ($level:ident, $fmt:expr) => {{ let _ = $fmt; }};
        ($level:ident, $fmt:expr, $($arg:expr),* $(,)*) => {{ let _ = $fmt; $( let _ = &$arg; )* }};
    }
}

macro_rules! net_trace {
    ($($arg:tt)*) => (net_log!(trace, $($arg)*));
}

macro_rules! net_debug {
    ($($arg:tt)*) => (net_log!(debug, $($arg)*));
}

macro_rules! net_warn {
    ($($arg:tt)*) => (net_log!(warn, $($arg)*));
}
