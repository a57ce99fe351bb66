//! Cooperative cancellation by polling a monotonic clock.
//!
//! Checkers poll [`Deadline::expired`] at the top of every main-loop cycle
//! and after every inner propagation round; nothing suspends or yields.
//! Without the `std` feature there is no clock and a deadline never
//! expires.

use core::time::Duration;

/// A point in time after which a check must abort with `timeout = true`
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    #[cfg(feature = "std")]
    start: Option<std::time::Instant>,
    #[cfg(feature = "std")]
    at: Option<std::time::Instant>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn unbounded() -> Self {
        #[cfg(feature = "std")]
        {
            Self {
                start: Some(std::time::Instant::now()),
                at: None,
            }
        }
        #[cfg(not(feature = "std"))]
        {
            Self {}
        }
    }

    /// A deadline `timeout` from now
    #[cfg(feature = "std")]
    pub fn within(timeout: Duration) -> Self {
        let now = std::time::Instant::now();
        Self {
            start: Some(now),
            at: now.checked_add(timeout),
        }
    }

    /// Returns `true` once the deadline has passed
    #[inline]
    pub fn expired(&self) -> bool {
        #[cfg(feature = "std")]
        {
            match self.at {
                Some(at) => std::time::Instant::now() >= at,
                None => false,
            }
        }
        #[cfg(not(feature = "std"))]
        {
            false
        }
    }

    /// Time elapsed since this deadline was created, when a clock exists
    pub fn elapsed(&self) -> Option<Duration> {
        #[cfg(feature = "std")]
        {
            self.start.map(|s| s.elapsed())
        }
        #[cfg(not(feature = "std"))]
        {
            None
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_expires() {
        let d = Deadline::unbounded();
        assert!(!d.expired());
        assert!(d.elapsed().is_some());
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let d = Deadline::within(Duration::ZERO);
        assert!(d.expired());
    }
}
