#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Three-tier SMP thread scheduling core for a microkernel.
//!
//! This crate decides which thread runs next on each CPU. It owns no
//! hardware: context switching, timers and interrupt delivery live in the
//! embedding kernel, which reaches the scheduler through a handful of entry
//! points and supplies topology, a clock and a fatal sink through
//! [`Platform`].
//!
//! # Tiers
//!
//! Every CPU runs a [`SmpLocalScheduler`] with three tier classes, dispatched
//! in strict order:
//!
//! - **Real-time**: five FIFO levels for `SoftRealtime` threads
//! - **High priority**: five FIFO levels with slices that grow with depth
//! - **Fair share**: an ordered map keyed by weighted virtual runtime
//!
//! Threads that burn their whole slice repeatedly are demoted one schedule
//! group; threads that yield early are promoted, always within the bounds of
//! their policy.
//!
//! # Features
//!
//! - `debug-invariants`: validate the fair-share map after every mutation
//!   and treat a violation as fatal corruption
//!
//! # Quick Start
//!
//! ```ignore
//! use tiered_sched::{GlobalScheduler, SchedConfig, ThreadBuilder, ProcessId};
//!
//! static SCHED: spin::Lazy<GlobalScheduler> =
//!     spin::Lazy::new(|| GlobalScheduler::new(board_platform(), SchedConfig::default()));
//!
//! fn boot_cpu_main() {
//!     SCHED.init_global().expect("scheduler init");
//!     SCHED.init_local().expect("boot cpu init");
//!     SCHED.spawn_thread(ProcessId::KERNEL, ThreadBuilder::new().name("idle"))
//!         .expect("spawn idle thread");
//! }
//!
//! fn timer_tick(current: Arc<Thread>, ran: Duration) {
//!     SCHED.requeue(current, ran, SwitchReason::SliceExpired).ok();
//!     if let Some(next) = SCHED.schedule() {
//!         switch_to(next);
//!     }
//! }
//! ```

extern crate alloc;

#[cfg(test)]
extern crate std;

// Core modules
pub mod arch;
pub mod collections;
pub mod config;
pub mod errors;
pub mod process;
pub mod sched;
pub mod thread;
pub mod time;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// Platform abstraction
pub use arch::{AddressSpaceHandle, ContextHandle, Platform, StackHandle, UniprocessorPlatform};

// Containers
pub use collections::{DynArray, OrderedMap};

// Configuration
pub use config::SchedConfig;

// Scheduler
pub use sched::{
    CpuId, GlobalScheduler, InsertRemedy, LocalScheduler, Residency, SmpLocalScheduler, SwitchReason, Tier,
};

// Processes and threads
pub use process::{Process, ProcessId, ProcessKind};
pub use thread::{Priority, SchedPolicy, ScheduleGroup, Thread, ThreadBuilder, ThreadId, ThreadState};

// Time
pub use time::{Duration, Instant};

// Errors
pub use errors::{Corruption, MapError, SchedError, SchedResult, ScheduleError};
