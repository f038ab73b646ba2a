//! Test helper utilities and common functionality.

use core::cell::Cell;

use alloc::sync::Arc;
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::arch::Platform;
use crate::config::SchedConfig;
use crate::errors::Corruption;
use crate::process::{Process, ProcessId, ProcessKind};
use crate::sched::{CpuId, GlobalScheduler};
use crate::thread::{Priority, SchedPolicy, Thread, ThreadBuilder, ThreadId};
use crate::time::Instant;

std::thread_local! {
    static CURRENT_CPU: Cell<CpuId> = const { Cell::new(0) };
}

/// Multi-CPU platform double.
///
/// Each host thread plays one CPU; [`run_on`](Self::run_on) sets which one.
/// A reported CPU count of zero stands for failed discovery.
pub(crate) struct TestPlatform {
    cpus: AtomicUsize,
    clock: AtomicU64,
}

impl TestPlatform {
    pub(crate) fn new(cpus: usize) -> Arc<Self> {
        Arc::new(Self {
            cpus: AtomicUsize::new(cpus),
            clock: AtomicU64::new(0),
        })
    }

    pub(crate) fn set_cpu_count(&self, cpus: usize) {
        self.cpus.store(cpus, Ordering::SeqCst);
    }

    /// Make the calling host thread act as `cpu`.
    pub(crate) fn run_on(cpu: CpuId) {
        CURRENT_CPU.with(|current| current.set(cpu));
    }

    pub(crate) fn advance(&self, nanos: u64) {
        self.clock.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Platform for TestPlatform {
    fn cpu_count(&self) -> Option<usize> {
        match self.cpus.load(Ordering::SeqCst) {
            0 => None,
            cpus => Some(cpus),
        }
    }

    fn current_cpu(&self) -> CpuId {
        CURRENT_CPU.with(Cell::get)
    }

    fn now(&self) -> Instant {
        Instant::from_nanos(self.clock.load(Ordering::SeqCst))
    }

    fn fatal(&self, report: &Corruption) -> ! {
        panic!("scheduler corruption: {}", report)
    }
}

/// Global scheduler on `cpus` CPUs with `ready` of them brought up.
pub(crate) fn booted(cpus: usize, ready: &[CpuId]) -> (Arc<TestPlatform>, GlobalScheduler) {
    let platform = TestPlatform::new(cpus);
    let sched = GlobalScheduler::new(platform.clone(), SchedConfig::default());
    sched.init_global().unwrap();
    for &cpu in ready {
        TestPlatform::run_on(cpu);
        sched.init_local().unwrap();
    }
    TestPlatform::run_on(0);
    (platform, sched)
}

/// Registers a user process with `sched`.
pub(crate) fn user_process(sched: &GlobalScheduler, id: u64, kind: ProcessKind) -> Arc<Process> {
    let process = Process::new(ProcessId::new(id), kind, Priority::Normal, "test");
    sched.register_process(process.clone()).unwrap();
    process
}

/// Test thread factory for creating threads with consistent configuration.
///
/// Threads built here are not filed with their process nor queued.
pub(crate) struct TestThreadFactory {
    next_id: AtomicU64,
    process: Arc<Process>,
}

impl TestThreadFactory {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000), // Start from high number to avoid conflicts
            process: Process::new(ProcessId::new(99), ProcessKind::UserApplication, Priority::Normal, "factory"),
        }
    }

    pub(crate) fn build(&self, builder: ThreadBuilder) -> Arc<Thread> {
        let id = ThreadId::new(self.next_id.fetch_add(1, Ordering::SeqCst)).unwrap();
        builder.build(id, &self.process, Instant::default())
    }

    pub(crate) fn with_policy(&self, policy: SchedPolicy) -> Arc<Thread> {
        self.build(ThreadBuilder::new().policy(policy))
    }
}

/// Synchronization primitives for test coordination.
pub(crate) struct TestBarrier {
    counter: AtomicU64,
    target: u64,
    released: AtomicBool,
}

impl TestBarrier {
    pub(crate) fn new(count: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            target: count,
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn wait(&self) {
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        if count == self.target {
            self.released.store(true, Ordering::Release);
        } else {
            while !self.released.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
        }
    }
}

/// Simple linear congruential generator for property testing.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 16
    }

    pub(crate) fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() % (max - min))
    }

    pub(crate) fn gen_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }

    pub(crate) fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.gen_range(0, items.len() as u64) as usize]
    }
}

/// Assert a thread's lifecycle state with a readable message.
macro_rules! assert_thread_state {
    ($thread:expr, $expected:expr) => {
        assert_eq!(
            $thread.state(),
            $expected,
            "Thread {} expected state {:?}, found {:?}",
            $thread.id(),
            $expected,
            $thread.state()
        );
    };
}
