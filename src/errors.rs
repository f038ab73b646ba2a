//! Error handling for the scheduling core.
//!
//! Recoverable outcomes are ordinary `Result`s built from the enums in this
//! module. Structural corruption is deliberately *not* an error variant: it is
//! described by a [`Corruption`] report and handed to the platform's fatal
//! sink at the point of detection.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

use crate::process::ProcessId;
use crate::sched::CpuId;
use crate::thread::ThreadId;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Result type for ordered-map and dynamic-array operations.
pub type MapResult<T> = Result<T, MapError>;

/// Top-level error type for the scheduling core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Container errors
    Map(MapError),
    /// Thread placement and dispatch errors
    Schedule(ScheduleError),
    /// Lifecycle misuse (init ordering, double init)
    Init(InitError),
    /// Process directory errors
    Process(ProcessError),
}

/// Errors reported by the keyed containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Strict insert on a key that is already present
    DuplicateKey(u64),
    /// Key is not present
    NotFound(u64),
    /// Arena or buffer could not grow
    OutOfMemory,
}

/// Errors related to placing threads on local schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The thread carries a scheduling policy value nobody recognizes
    InvalidPolicy(u8),
    /// The thread is already resident in some tier
    AlreadyQueued(ThreadId),
    /// The thread is not resident in any tier of this scheduler
    NotQueued(ThreadId),
    /// CPU does not exist
    InvalidCpu(CpuId),
    /// The target local scheduler has not run `init` yet
    CpuNotReady(CpuId),
    /// The fair-share map could not grow
    OutOfMemory,
    /// The thread has exited and may not run again
    ThreadFinished(ThreadId),
    /// The thread is running and cannot be moved until it is switched out
    ThreadRunning(ThreadId),
}

/// Initialization ordering and double-initialization errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Global initialization has not completed
    NotInitialized,
    /// Component was already initialized
    AlreadyInitialized,
    /// The platform could not report a usable CPU count
    CpuDiscoveryFailed,
    /// The calling CPU has no scheduler slot
    NoSlotForCpu(CpuId),
}

/// Process directory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// A process with this id is already registered
    AlreadyRegistered(ProcessId),
    /// No process with this id is registered
    NotFound(ProcessId),
    /// The kernel process cannot be unregistered
    KernelProcess,
    /// The owning process is gone
    Orphaned(ThreadId),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Map(e) => write!(f, "Container error: {}", e),
            SchedError::Schedule(e) => write!(f, "Scheduling error: {}", e),
            SchedError::Init(e) => write!(f, "Initialization error: {}", e),
            SchedError::Process(e) => write!(f, "Process error: {}", e),
        }
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::DuplicateKey(key) => write!(f, "Key {:#x} already present", key),
            MapError::NotFound(key) => write!(f, "Key {:#x} not found", key),
            MapError::OutOfMemory => write!(f, "Out of memory"),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::InvalidPolicy(raw) => write!(f, "Invalid scheduling policy: {}", raw),
            ScheduleError::AlreadyQueued(tid) => write!(f, "Thread {} is already queued", tid),
            ScheduleError::NotQueued(tid) => write!(f, "Thread {} is not queued here", tid),
            ScheduleError::InvalidCpu(cpu) => write!(f, "Invalid CPU ID: {}", cpu),
            ScheduleError::CpuNotReady(cpu) => write!(f, "CPU {} scheduler not initialized", cpu),
            ScheduleError::OutOfMemory => write!(f, "Out of memory for run queue"),
            ScheduleError::ThreadFinished(tid) => write!(f, "Thread {} has finished", tid),
            ScheduleError::ThreadRunning(tid) => write!(f, "Thread {} is running", tid),
        }
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::NotInitialized => write!(f, "Global scheduler not initialized"),
            InitError::AlreadyInitialized => write!(f, "Already initialized"),
            InitError::CpuDiscoveryFailed => write!(f, "CPU count discovery failed"),
            InitError::NoSlotForCpu(cpu) => write!(f, "No scheduler slot for CPU {}", cpu),
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::AlreadyRegistered(pid) => write!(f, "Process {} already registered", pid),
            ProcessError::NotFound(pid) => write!(f, "Process {} not found", pid),
            ProcessError::KernelProcess => write!(f, "The kernel process cannot be removed"),
            ProcessError::Orphaned(tid) => write!(f, "Thread {} has no owning process", tid),
        }
    }
}

impl From<MapError> for SchedError {
    fn from(error: MapError) -> Self {
        SchedError::Map(error)
    }
}

impl From<ScheduleError> for SchedError {
    fn from(error: ScheduleError) -> Self {
        SchedError::Schedule(error)
    }
}

impl From<InitError> for SchedError {
    fn from(error: InitError) -> Self {
        SchedError::Init(error)
    }
}

impl From<ProcessError> for SchedError {
    fn from(error: ProcessError) -> Self {
        SchedError::Process(error)
    }
}

impl SchedError {
    /// Whether retrying the same request on another CPU can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedError::Schedule(ScheduleError::CpuNotReady(_))
                | SchedError::Schedule(ScheduleError::OutOfMemory)
                | SchedError::Schedule(ScheduleError::InvalidCpu(_))
                | SchedError::Map(MapError::OutOfMemory)
        )
    }
}

/// Which structure was found corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    /// A real-time FIFO queue at the given level
    RealtimeQueue(usize),
    /// A high-priority FIFO queue at the given level
    HighPriorityQueue(usize),
    /// The fair-share ordered map
    FairMap,
    /// A thread's tier residency record
    Residency,
}

/// What the scheduler was doing when it noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Remove,
    Dispatch,
}

/// Diagnostic context for an unrecoverable structural violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    pub cpu: CpuId,
    pub structure: Structure,
    pub operation: Operation,
    pub detail: &'static str,
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Structure::RealtimeQueue(level) => write!(f, "real-time queue {}", level),
            Structure::HighPriorityQueue(level) => write!(f, "high-priority queue {}", level),
            Structure::FairMap => write!(f, "fair-share map"),
            Structure::Residency => write!(f, "thread residency"),
        }
    }
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu {}: {} corrupted during {:?}: {}",
            self.cpu, self.structure, self.operation, self.detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_transient_classification() {
        assert!(SchedError::from(ScheduleError::CpuNotReady(1)).is_transient());
        assert!(SchedError::from(MapError::OutOfMemory).is_transient());
        assert!(!SchedError::from(ScheduleError::InvalidPolicy(9)).is_transient());
        let tid = ThreadId::new(4).unwrap();
        assert!(!SchedError::from(ScheduleError::ThreadFinished(tid)).is_transient());
        assert!(!SchedError::from(ScheduleError::ThreadRunning(tid)).is_transient());
        assert!(!SchedError::from(InitError::AlreadyInitialized).is_transient());
    }

    #[test]
    fn test_corruption_display_names_structure() {
        let report = Corruption {
            cpu: 2,
            structure: Structure::HighPriorityQueue(3),
            operation: Operation::Insert,
            detail: "tail without head",
        };
        let text = report.to_string();
        assert!(text.contains("cpu 2"));
        assert!(text.contains("high-priority queue 3"));
        assert!(text.contains("tail without head"));
    }
}
