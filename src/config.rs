//! Scheduler tunables.
//!
//! A [`SchedConfig`] is handed to
//! [`GlobalScheduler::new`](crate::sched::GlobalScheduler::new) once at boot
//! and copied into every local scheduler. All values have sane defaults; the
//! setters follow the builder style used for threads.

use crate::time::Duration;

/// Upper bound on logical CPUs the core will manage.
pub const MAX_CPUS: usize = 256;

/// Number of levels inside the real-time and high-priority tier classes.
pub const TIER_LEVELS: usize = 5;

/// Weight of a `Priority::Normal` thread in the fair-share tier.
pub const NICE_0_WEIGHT: u64 = 1024;

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// CPUs beyond this count are left unmanaged
    pub max_cpus: usize,
    /// Slice for every real-time level
    pub realtime_slice: Duration,
    /// Slice for high-priority level 0; level `n` gets `(n + 1)` times this
    pub high_priority_slice: Duration,
    /// Slice for fair-share threads
    pub fair_slice: Duration,
    /// Consecutive full-slice expiries before a thread is demoted
    pub demote_after: u32,
    /// A yield using less than `slice / promote_divisor` promotes the thread
    pub promote_divisor: u64,
}

impl SchedConfig {
    pub const fn new() -> Self {
        Self {
            max_cpus: MAX_CPUS,
            realtime_slice: Duration::from_millis(1),
            high_priority_slice: Duration::from_millis(2),
            fair_slice: Duration::from_millis(10),
            demote_after: 2,
            promote_divisor: 2,
        }
    }

    pub fn max_cpus(mut self, max_cpus: usize) -> Self {
        self.max_cpus = max_cpus.clamp(1, MAX_CPUS);
        self
    }

    pub fn realtime_slice(mut self, slice: Duration) -> Self {
        self.realtime_slice = slice;
        self
    }

    pub fn high_priority_slice(mut self, slice: Duration) -> Self {
        self.high_priority_slice = slice;
        self
    }

    pub fn fair_slice(mut self, slice: Duration) -> Self {
        self.fair_slice = slice;
        self
    }

    /// Zero is treated as one: every expiry demotes.
    pub fn demote_after(mut self, expiries: u32) -> Self {
        self.demote_after = expiries.max(1);
        self
    }

    pub fn promote_divisor(mut self, divisor: u64) -> Self {
        self.promote_divisor = divisor.max(1);
        self
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let config = SchedConfig::new().max_cpus(0).demote_after(0).promote_divisor(0);
        assert_eq!(config.max_cpus, 1);
        assert_eq!(config.demote_after, 1);
        assert_eq!(config.promote_divisor, 1);

        let config = SchedConfig::default().max_cpus(100_000);
        assert_eq!(config.max_cpus, MAX_CPUS);
    }
}
