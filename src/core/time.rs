//! Wall-clock time utilities.
//!
//! Cache expiry is evaluated against an injected [`Clock`] rather than sampled
//! directly, so tests can move time forwards and backwards and the clock-jump
//! guard in [`crate::control::cache`] can be exercised deterministically.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A wall-clock instant in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick {
    /// Milliseconds since the Unix epoch.
    pub ms: u64,
}

impl Tick {
    /// Create a new tick with the given millisecond value.
    pub const fn new(ms: u64) -> Self {
        Self { ms }
    }

    /// Create a tick representing the epoch.
    pub const fn zero() -> Self {
        Self { ms: 0 }
    }

    /// Add a duration to this tick, saturating.
    pub fn add(self, duration: Duration) -> Self {
        Self {
            ms: self.ms.saturating_add(duration_ms(duration)),
        }
    }

    /// Subtract milliseconds from this tick, saturating at zero.
    pub const fn sub_ms(self, ms: u64) -> Self {
        Self {
            ms: self.ms.saturating_sub(ms),
        }
    }

    /// Check if this tick is strictly before the given deadline.
    pub const fn is_before(self, deadline: Tick) -> bool {
        self.ms < deadline.ms
    }

    /// Milliseconds until a deadline.
    ///
    /// Returns 0 if the deadline has already passed.
    pub fn ms_until(self, deadline: Tick) -> u64 {
        deadline.ms.saturating_sub(self.ms)
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tick({}ms)", self.ms)
    }
}

/// Whole milliseconds of a duration, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> Tick;
}

/// Clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Tick {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_ms)
            .unwrap_or(0);
        Tick::new(ms)
    }
}

/// Manually driven clock for tests and offline tools.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Tick) -> Self {
        Self {
            ms: AtomicU64::new(start.ms),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.ms.fetch_add(duration_ms(duration), Ordering::SeqCst);
    }

    /// Jump the clock to an arbitrary instant, including backwards.
    pub fn set(&self, tick: Tick) {
        self.ms.store(tick.ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        Tick::new(self.ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn manual_clock_moves_both_ways() {
        let clock = ManualClock::new(Tick::new(10_000));
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), Tick::new(15_000));

        clock.set(Tick::new(1_000));
        assert_eq!(clock.now(), Tick::new(1_000));
    }

    #[test]
    fn tick_arithmetic_saturates() {
        assert_eq!(Tick::new(5).sub_ms(10), Tick::zero());
        assert_eq!(Tick::new(u64::MAX).add(Duration::from_secs(1)).ms, u64::MAX);
        assert_eq!(Tick::new(100).ms_until(Tick::new(40)), 0);
        assert!(Tick::new(1).is_before(Tick::new(2)));
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now().ms > 1_577_836_800_000);
    }
}
