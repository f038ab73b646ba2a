//! Monotonic time values used for run-time accounting.
//!
//! The scheduler never reads a clock itself; instants come from
//! [`Platform::now`](crate::arch::Platform::now) and durations from the
//! local-timer collaborator that reports how long a thread actually ran.

/// Nanoseconds since some arbitrary, platform-defined epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    /// Create a new instant from nanoseconds since epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds since epoch.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Duration since an earlier instant, saturating at zero.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos()))
    }
}

/// A duration of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    /// Create a duration from nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create a duration from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    /// Create a duration from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Get nanoseconds in this duration.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Get microseconds in this duration.
    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Get milliseconds in this duration.
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    pub fn saturating_add(self, other: Duration) -> Duration {
        Duration(self.0.saturating_add(other.0))
    }
}

impl core::ops::Add for Duration {
    type Output = Self;

    fn add(self, other: Duration) -> Self {
        self.saturating_add(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(Duration::from_millis(3).as_micros(), 3_000);
        assert_eq!(Duration::from_micros(2_500).as_millis(), 2);
        assert_eq!(Duration::from_nanos(7).as_nanos(), 7);
    }

    #[test]
    fn test_instant_arithmetic_saturates() {
        let early = Instant::from_nanos(100);
        let late = early + Duration::from_nanos(50);
        assert_eq!(late.saturating_duration_since(early), Duration::from_nanos(50));
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
        assert_eq!(Instant::from_nanos(u64::MAX) + Duration::from_nanos(1), Instant::from_nanos(u64::MAX));
    }
}
