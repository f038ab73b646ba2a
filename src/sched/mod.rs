//! Thread scheduling.
//!
//! [`GlobalScheduler`] is the entry point the rest of the kernel talks to. It
//! owns one [`LocalScheduler`] per CPU; the stock variant is the three-tier
//! [`SmpLocalScheduler`].

pub mod global;
pub mod local;
mod queue;
pub mod smp;

pub use global::{GlobalScheduler, InsertRemedy};
pub use local::{CpuId, LocalScheduler, LocalSchedulerFactory, Residency, SwitchReason, Tier};
pub use smp::{SmpLocalScheduler, TierCounts};
