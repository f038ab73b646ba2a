//! Architecture and platform collaborators.
//!
//! The scheduling core never touches hardware. Everything it needs from the
//! machine (topology, the identity of the calling CPU, a monotonic clock and a
//! way to halt on unrecoverable corruption) is reached through the
//! [`Platform`] trait, and every architecture-owned object a thread refers to
//! is an opaque handle the scheduler stores but never interprets.

use core::num::NonZeroUsize;

use portable_atomic::{AtomicU64, Ordering};

use crate::errors::Corruption;
use crate::sched::CpuId;
use crate::time::Instant;

/// Platform abstraction trait.
///
/// Implemented once per board/architecture by the embedding kernel.
pub trait Platform: Send + Sync {
    /// Number of logical CPUs, or `None` if topology discovery failed.
    ///
    /// Queried exactly once, from `init_global`.
    fn cpu_count(&self) -> Option<usize>;

    /// Logical id of the CPU executing the caller.
    fn current_cpu(&self) -> CpuId;

    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Report an unrecoverable structural violation and halt.
    ///
    /// Implementations typically disable interrupts, print the report and
    /// park every CPU; they must not return.
    fn fatal(&self, report: &Corruption) -> !;
}

/// A uniprocessor platform with a software clock.
///
/// Useful for bring-up and host-side testing. Its clock only moves when
/// [`advance`](Self::advance) is called; `fatal` panics.
pub struct UniprocessorPlatform {
    clock: AtomicU64,
}

impl UniprocessorPlatform {
    pub const fn new() -> Self {
        Self { clock: AtomicU64::new(0) }
    }

    /// Move the software clock forward by `nanos`.
    pub fn advance(&self, nanos: u64) {
        self.clock.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Default for UniprocessorPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for UniprocessorPlatform {
    fn cpu_count(&self) -> Option<usize> {
        Some(1)
    }

    fn current_cpu(&self) -> CpuId {
        0
    }

    fn now(&self) -> Instant {
        Instant::from_nanos(self.clock.load(Ordering::Acquire))
    }

    fn fatal(&self, report: &Corruption) -> ! {
        panic!("scheduler corruption: {}", report)
    }
}

/// Opaque handle to an architecture-specific saved register context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(NonZeroUsize);

impl ContextHandle {
    /// Wrap a raw handle value produced by the arch layer. Zero is not a handle.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Opaque handle to a kernel or user stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackHandle(NonZeroUsize);

impl StackHandle {
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Opaque handle to an address space (e.g. a page-table root).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpaceHandle(NonZeroUsize);

impl AddressSpaceHandle {
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_reject_zero() {
        assert!(ContextHandle::from_raw(0).is_none());
        assert_eq!(ContextHandle::from_raw(0x1000).map(ContextHandle::as_raw), Some(0x1000));
        assert!(StackHandle::from_raw(0).is_none());
        assert!(AddressSpaceHandle::from_raw(0).is_none());
    }

    #[test]
    fn test_uniprocessor_clock() {
        let platform = UniprocessorPlatform::new();
        assert_eq!(platform.cpu_count(), Some(1));
        assert_eq!(platform.current_cpu(), 0);
        platform.advance(250);
        assert_eq!(platform.now(), Instant::from_nanos(250));
    }
}
