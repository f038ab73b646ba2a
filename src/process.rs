//! Process records.
//!
//! A process owns the directory entries of its threads (an ordered map keyed
//! by thread id) but not their run-queue membership, which belongs to the
//! local schedulers.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::collections::OrderedMap;
use crate::errors::{MapError, MapResult};
use crate::thread::{Priority, SchedPolicy, Thread, ThreadId};

/// Arena size a thread directory starts at once it grows.
const THREAD_DIRECTORY_MIN: usize = 8;

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// The kernel process.
    pub const KERNEL: ProcessId = ProcessId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Kernel,
    KernelDriver,
    UserApplication,
    UserDriver,
    UserBackground,
}

impl ProcessKind {
    /// Policy given to threads that do not ask for one.
    pub const fn default_policy(self) -> SchedPolicy {
        match self {
            ProcessKind::Kernel | ProcessKind::KernelDriver => SchedPolicy::HighPriority,
            ProcessKind::UserApplication | ProcessKind::UserDriver => SchedPolicy::Normal,
            ProcessKind::UserBackground => SchedPolicy::Background,
        }
    }
}

pub struct Process {
    id: ProcessId,
    kind: ProcessKind,
    priority: Priority,
    name: String,
    threads: spin::Mutex<OrderedMap<Arc<Thread>>>,
}

impl Process {
    pub fn new(id: ProcessId, kind: ProcessKind, priority: Priority, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            priority,
            name: String::from(name),
            threads: spin::Mutex::new(OrderedMap::new()),
        })
    }

    /// The kernel process record (fixed id, high priority).
    pub(crate) fn kernel() -> Arc<Self> {
        Self::new(ProcessId::KERNEL, ProcessKind::Kernel, Priority::High, "kernel")
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.lock().search_fast(id.as_u64()).cloned()
    }

    /// File a thread in this process's directory.
    pub(crate) fn attach_thread(&self, thread: Arc<Thread>) -> MapResult<()> {
        let key = thread.id().as_u64();
        OrderedMap::lock_spare(&self.threads, THREAD_DIRECTORY_MIN)?.insert(key, thread)
    }

    pub(crate) fn detach_thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.lock().erase(id.as_u64())
    }

    /// Snapshot of the threads in id order.
    pub fn threads(&self) -> MapResult<Vec<Arc<Thread>>> {
        let mut snapshot = Vec::new();
        loop {
            let wanted = self.threads.lock().len();
            snapshot
                .try_reserve_exact(wanted)
                .map_err(|_| MapError::OutOfMemory)?;
            let threads = self.threads.lock();
            // Grew while unlocked; size the buffer again.
            if threads.len() <= snapshot.capacity() {
                snapshot.extend(threads.iter().map(|(_, thread)| thread.clone()));
                return Ok(snapshot);
            }
        }
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("name", &self.name)
            .field("threads", &self.thread_count())
            .finish()
    }
}
