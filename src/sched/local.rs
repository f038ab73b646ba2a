//! Local (per-CPU) scheduler interface.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::arch::Platform;
use crate::config::SchedConfig;
use crate::errors::SchedResult;
use crate::thread::Thread;
use crate::time::Duration;

/// CPU identifier type.
pub type CpuId = usize;

/// Ready-queue tier a thread can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Real-time FIFO at `level` (0 = most urgent)
    Realtime(usize),
    /// High-priority FIFO at `level` (0 = most urgent)
    HighPriority(usize),
    /// Fair-share map under this fairness key
    Fair { key: u64 },
}

/// Where a queued thread currently lives.
///
/// Recorded on the thread itself so removal never has to search every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Residency {
    pub cpu: CpuId,
    pub tier: Tier,
}

/// Why a running thread gave the CPU back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// The local timer found its slice used up
    SliceExpired,
    /// The thread yielded voluntarily and stays runnable
    Yielded,
    /// The thread is waiting on something; it is not requeued
    Blocked,
    /// The thread finished; it is not requeued
    Exited,
}

/// Builds the local scheduler variant for one CPU slot.
pub type LocalSchedulerFactory =
    fn(cpu: CpuId, platform: Arc<dyn Platform>, config: SchedConfig) -> Box<dyn LocalScheduler>;

/// Per-CPU dispatcher capability set.
///
/// The global scheduler holds one trait object per logical CPU and never
/// needs to know the concrete variant. Every method may be invoked from any
/// CPU (e.g. waking a thread from another core's interrupt handler), so
/// implementations protect each tier with its own spinlock.
pub trait LocalScheduler: Send + Sync {
    /// CPU slot this scheduler serves.
    fn cpu_id(&self) -> CpuId;

    /// Initialize on the owning CPU.
    ///
    /// Must be called exactly once; a second call reports
    /// `InitError::AlreadyInitialized`.
    fn init(&self) -> SchedResult<()>;

    fn is_initialized(&self) -> bool;

    /// Queue a ready thread.
    ///
    /// The thread is classified into a tier by its scheduling policy and
    /// schedule group. On failure nothing changes: no tier count moves and
    /// the thread's residency stays empty.
    ///
    /// # Arguments
    ///
    /// * `thread` - Thread to queue; must not already be queued anywhere
    fn insert_thread(&self, thread: &Arc<Thread>) -> SchedResult<()>;

    /// Unlink a thread from whichever tier of this scheduler holds it.
    ///
    /// Reports `ScheduleError::NotQueued` if it is not queued here.
    fn remove_thread(&self, thread: &Arc<Thread>) -> SchedResult<()>;

    /// Pick the next thread to run on this CPU.
    ///
    /// Real-time levels first, then high-priority levels, then the
    /// fair-share tier. The returned thread is no longer queued.
    fn pick_next(&self) -> Option<Arc<Thread>>;

    /// Account a thread that just stopped running and requeue it if it is
    /// still runnable.
    ///
    /// # Arguments
    ///
    /// * `thread` - The thread that was running
    /// * `ran` - How long it actually ran
    /// * `reason` - Why it stopped
    fn put_prev(&self, thread: Arc<Thread>, ran: Duration, reason: SwitchReason) -> SchedResult<()>;

    /// Slice length the thread gets when dispatched from its current tier.
    fn time_slice(&self, thread: &Thread) -> Duration;

    /// Number of threads queued across all tiers.
    fn queued_count(&self) -> usize;
}
