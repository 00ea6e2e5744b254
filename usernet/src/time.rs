/*! Ticks and deadlines.

The reactor does not read a clock on its own. Every time-dependent decision (connect timeouts,
idle reclamation) compares against the tick most recently handed to the engine, which keeps the
policy deterministic and testable.

 - [Instant] is an absolute tick in milliseconds.
 - [Expiration] is a deadline that may be absent.

[Instant]: struct.Instant.html
[Expiration]: enum.Expiration.html
*/
use core::{fmt, ops};
pub use core::time::Duration;

/// An absolute tick, in milliseconds since an arbitrary origin.
///
/// Only differences between instants are meaningful. The origin is usually the start of the
/// reactor but nothing depends on it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    millis: i64,
}

/// A deadline, inversion of `Option`.
///
/// Compares such that `Never` is later than every `When`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expiration {
    /// Expires once the tick reaches the contained instant.
    When(Instant),
    /// Never expires.
    Never,
}

impl Instant {
    /// The zero tick.
    pub const ZERO: Instant = Instant { millis: 0 };

    /// Create a new `Instant` from a number of milliseconds.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// Create a new `Instant` from a number of seconds.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    /// Create a new `Instant` from the current [std::time::SystemTime].
    ///
    /// [std::time::SystemTime]: https://doc.rust-lang.org/std/time/struct.SystemTime.html
    pub fn now() -> Instant {
        Self::from(::std::time::SystemTime::now())
    }

    /// The total number of milliseconds since the origin.
    pub fn total_millis(&self) -> i64 {
        self.millis
    }

    /// The time until `later`, saturating at zero.
    pub fn until(self, later: Instant) -> Duration {
        Duration::from_millis((later.millis - self.millis).max(0) as u64)
    }
}

impl Expiration {
    /// Check if the deadline has been reached at `now`.
    pub fn is_expired(self, now: Instant) -> bool {
        match self {
            Expiration::When(deadline) => deadline <= now,
            Expiration::Never => false,
        }
    }

    /// The deadline instant, if any.
    pub fn instant(self) -> Option<Instant> {
        match self {
            Expiration::When(instant) => Some(instant),
            Expiration::Never => None,
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.millis / 1000, self.millis.rem_euclid(1000))
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis + rhs.as_millis() as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.as_millis() as i64;
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_millis((self.millis - rhs.millis).unsigned_abs())
    }
}

/// Times before the unix epoch all map to the zero tick.
impl From<::std::time::SystemTime> for Instant {
    fn from(other: ::std::time::SystemTime) -> Instant {
        let n = other.duration_since(::std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_millis(n.as_secs() as i64 * 1000 + i64::from(n.subsec_millis()))
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(instant: Option<Instant>) -> Self {
        match instant {
            Some(instant) => Expiration::When(instant),
            None => Expiration::Never,
        }
    }
}
