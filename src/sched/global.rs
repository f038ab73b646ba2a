//! Global scheduler: the system-wide entry point.
//!
//! Owns one local scheduler per logical CPU, the process directory (with the
//! kernel process registered at boot) and the policy for threads that a
//! local scheduler refuses.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use portable_atomic::{AtomicU64, AtomicU8, Ordering};

use super::local::{CpuId, LocalScheduler, LocalSchedulerFactory, SwitchReason};
use super::smp::SmpLocalScheduler;
use crate::arch::Platform;
use crate::collections::OrderedMap;
use crate::config::SchedConfig;
use crate::errors::{InitError, MapError, ProcessError, SchedError, SchedResult, ScheduleError};
use crate::process::{Process, ProcessId};
use crate::thread::{Thread, ThreadBuilder, ThreadId, ThreadState};
use crate::time::Duration;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Arena size the process directory starts at.
const PROCESS_DIRECTORY_MIN: usize = 16;

/// Outcome of [`GlobalScheduler::on_thread_insert_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRemedy {
    /// Another CPU accepted the thread
    Rehomed(CpuId),
    /// The thread was not queued anywhere; the caller still owns it
    Dropped,
}

/// System-wide scheduler.
///
/// Lifecycle: [`new`](Self::new) builds an empty scheduler,
/// [`init_global`](Self::init_global) runs once on the boot CPU, then every
/// CPU calls [`init_local`](Self::init_local) for itself. Only after that do
/// threads land on a CPU.
pub struct GlobalScheduler {
    platform: Arc<dyn Platform>,
    config: SchedConfig,
    factory: LocalSchedulerFactory,
    state: AtomicU8,
    locals: spin::Once<Box<[Box<dyn LocalScheduler>]>>,
    kernel: spin::Once<Arc<Process>>,
    processes: spin::Mutex<OrderedMap<Arc<Process>>>,
    next_thread_id: AtomicU64,
}

impl GlobalScheduler {
    /// Create a scheduler that will use [`SmpLocalScheduler`] on every CPU.
    ///
    /// # Arguments
    ///
    /// * `platform` - Topology, clock and fatal sink
    /// * `config` - Tunables copied into every local scheduler
    pub fn new(platform: Arc<dyn Platform>, config: SchedConfig) -> Self {
        Self::with_factory(platform, config, SmpLocalScheduler::boxed)
    }

    /// Create a scheduler with a custom local scheduler variant.
    pub fn with_factory(platform: Arc<dyn Platform>, config: SchedConfig, factory: LocalSchedulerFactory) -> Self {
        Self {
            platform,
            config,
            factory,
            state: AtomicU8::new(UNINITIALIZED),
            locals: spin::Once::new(),
            kernel: spin::Once::new(),
            processes: spin::Mutex::new(OrderedMap::new()),
            next_thread_id: AtomicU64::new(1),
        }
    }

    /// One-time global initialization, on the boot CPU.
    ///
    /// Discovers the CPU count, builds one local scheduler per CPU and
    /// registers the kernel process.
    ///
    /// # Returns
    ///
    /// `Err(InitError::AlreadyInitialized)` on any call after the first
    /// (successful or still running), `Err(InitError::CpuDiscoveryFailed)` if
    /// the platform reports no CPUs. A failed attempt may be retried.
    pub fn init_global(&self) -> SchedResult<()> {
        if self
            .state
            .compare_exchange(UNINITIALIZED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InitError::AlreadyInitialized.into());
        }

        match self.build() {
            Ok(count) => {
                self.state.store(READY, Ordering::Release);
                log::info!("global scheduler ready on {} cpus", count);
                Ok(())
            }
            Err(error) => {
                log::error!("global scheduler init failed: {}", error);
                self.state.store(UNINITIALIZED, Ordering::Release);
                Err(error)
            }
        }
    }

    fn build(&self) -> SchedResult<usize> {
        let count = match self.platform.cpu_count() {
            Some(count) if count > 0 => count.min(self.config.max_cpus),
            _ => return Err(InitError::CpuDiscoveryFailed.into()),
        };

        let mut locals = Vec::new();
        locals
            .try_reserve_exact(count)
            .map_err(|_| MapError::OutOfMemory)?;
        for cpu in 0..count {
            locals.push((self.factory)(cpu, self.platform.clone(), self.config));
        }

        let kernel = Process::kernel();
        OrderedMap::lock_spare(&self.processes, PROCESS_DIRECTORY_MIN)?
            .insert(ProcessId::KERNEL.as_u64(), kernel.clone())?;
        self.kernel.call_once(|| kernel);
        self.locals.call_once(|| locals.into_boxed_slice());
        Ok(count)
    }

    /// Per-CPU initialization, on the CPU being brought up.
    pub fn init_local(&self) -> SchedResult<()> {
        self.ensure_ready()?;
        let cpu = self.platform.current_cpu();
        let local = self.local(cpu).ok_or(InitError::NoSlotForCpu(cpu))?;
        local.init()?;
        log::info!("cpu {}: scheduler online", cpu);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    fn ensure_ready(&self) -> SchedResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(InitError::NotInitialized.into())
        }
    }

    /// Number of managed CPUs (zero before `init_global`).
    pub fn cpu_count(&self) -> usize {
        self.locals.get().map_or(0, |locals| locals.len())
    }

    /// Local scheduler of `cpu`.
    pub fn local(&self, cpu: CpuId) -> Option<&dyn LocalScheduler> {
        self.locals.get()?.get(cpu).map(|local| local.as_ref())
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn kernel_process(&self) -> Option<Arc<Process>> {
        self.kernel.get().cloned()
    }

    pub fn register_process(&self, process: Arc<Process>) -> SchedResult<()> {
        self.ensure_ready()?;
        let id = process.id();
        let inserted = OrderedMap::lock_spare(&self.processes, PROCESS_DIRECTORY_MIN)
            .and_then(|mut processes| processes.insert(id.as_u64(), process));
        match inserted {
            Ok(()) => {
                log::debug!("process {} registered", id);
                Ok(())
            }
            Err(MapError::DuplicateKey(_)) => Err(ProcessError::AlreadyRegistered(id).into()),
            Err(error) => Err(error.into()),
        }
    }

    /// Remove a process from the directory and pull its threads off every
    /// run queue. The threads end up `Finished`.
    pub fn unregister_process(&self, id: ProcessId) -> SchedResult<Arc<Process>> {
        self.ensure_ready()?;
        if id == ProcessId::KERNEL {
            return Err(ProcessError::KernelProcess.into());
        }
        let process = self
            .processes
            .lock()
            .erase(id.as_u64())
            .ok_or(ProcessError::NotFound(id))?;
        for thread in process.threads()? {
            self.retire(&thread);
        }
        log::debug!("process {} unregistered", id);
        Ok(process)
    }

    pub fn process(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.processes.lock().search_fast(id.as_u64()).cloned()
    }

    pub fn process_count(&self) -> usize {
        self.processes.lock().len()
    }

    /// Hand out a fresh thread id; ids are never reused.
    pub fn allocate_thread_id(&self) -> ThreadId {
        loop {
            if let Some(id) = ThreadId::new(self.next_thread_id.fetch_add(1, Ordering::AcqRel)) {
                return id;
            }
        }
    }

    /// Create a thread in process `pid` and queue it.
    ///
    /// The CPU comes from the builder if it names one, otherwise the least
    /// loaded initialized CPU is used. If no CPU accepts the thread it is
    /// taken out of the process again and the error is returned.
    pub fn spawn_thread(&self, pid: ProcessId, builder: ThreadBuilder) -> SchedResult<Arc<Thread>> {
        self.ensure_ready()?;
        let process = self.process(pid).ok_or(ProcessError::NotFound(pid))?;
        let requested = builder.requested_cpu();
        let thread = builder.build(self.allocate_thread_id(), &process, self.platform.now());
        process.attach_thread(thread.clone())?;

        let cpu = requested.unwrap_or_else(|| self.least_loaded_cpu());
        match self.insert_thread(&thread, cpu) {
            Ok(landed) => {
                log::debug!("thread {} ({}) spawned on cpu {}", thread.id(), thread.name(), landed);
                Ok(thread)
            }
            Err(error) => {
                process.detach_thread(thread.id());
                Err(error)
            }
        }
    }

    fn least_loaded_cpu(&self) -> CpuId {
        self.locals
            .get()
            .into_iter()
            .flat_map(|locals| locals.iter())
            .filter(|local| local.is_initialized())
            .min_by_key(|local| local.queued_count())
            .map_or(0, |local| local.cpu_id())
    }

    /// Queue `thread` on `cpu`, falling back to other CPUs per
    /// [`on_thread_insert_failed`](Self::on_thread_insert_failed).
    ///
    /// # Returns
    ///
    /// The CPU the thread actually landed on.
    pub fn insert_thread(&self, thread: &Arc<Thread>, cpu: CpuId) -> SchedResult<CpuId> {
        self.ensure_ready()?;
        let result = match self.local(cpu) {
            Some(local) => local.insert_thread(thread),
            None => Err(ScheduleError::InvalidCpu(cpu).into()),
        };
        match result {
            Ok(()) => Ok(cpu),
            Err(error) => match self.on_thread_insert_failed(thread, cpu, &error) {
                InsertRemedy::Rehomed(landed) => Ok(landed),
                InsertRemedy::Dropped => Err(error),
            },
        }
    }

    /// Decide what happens to a thread a local scheduler refused.
    ///
    /// Permanent errors (bad policy, already queued) drop it with a warning.
    /// Transient ones (CPU not up yet, no memory, no such CPU) retry every
    /// other CPU once, in ascending order after the one that failed.
    pub fn on_thread_insert_failed(&self, thread: &Arc<Thread>, cpu: CpuId, error: &SchedError) -> InsertRemedy {
        if !error.is_transient() {
            log::warn!("cpu {}: dropping thread {}: {}", cpu, thread.id(), error);
            return InsertRemedy::Dropped;
        }

        let count = self.cpu_count();
        for offset in 1..=count {
            let candidate = cpu.wrapping_add(offset) % count;
            if candidate == cpu {
                continue;
            }
            let Some(local) = self.local(candidate) else {
                continue;
            };
            if local.insert_thread(thread).is_ok() {
                log::debug!("thread {} rehomed from cpu {} to cpu {}", thread.id(), cpu, candidate);
                return InsertRemedy::Rehomed(candidate);
            }
        }

        log::warn!("no cpu accepted thread {} after cpu {} failed: {}", thread.id(), cpu, error);
        InsertRemedy::Dropped
    }

    /// Take a queued thread off whichever CPU holds it.
    pub fn remove_thread(&self, thread: &Arc<Thread>) -> SchedResult<()> {
        self.ensure_ready()?;
        let resident = thread
            .residency()
            .ok_or(ScheduleError::NotQueued(thread.id()))?;
        let local = self
            .local(resident.cpu)
            .ok_or(ScheduleError::InvalidCpu(resident.cpu))?;
        local.remove_thread(thread)
    }

    /// Move a thread to `dest`.
    ///
    /// A queued thread is removed from its current CPU first. A blocked
    /// thread is queued on `dest`. A running thread is refused with
    /// `ThreadRunning`: it still belongs to the CPU executing it until that
    /// CPU switches it out.
    pub fn migrate_thread(&self, thread: &Arc<Thread>, dest: CpuId) -> SchedResult<CpuId> {
        self.ensure_ready()?;
        if dest >= self.cpu_count() {
            return Err(ScheduleError::InvalidCpu(dest).into());
        }
        match self.remove_thread(thread) {
            Ok(()) => {}
            Err(SchedError::Schedule(ScheduleError::NotQueued(_))) => match thread.state() {
                ThreadState::Running => return Err(ScheduleError::ThreadRunning(thread.id()).into()),
                ThreadState::Finished => return Err(ScheduleError::ThreadFinished(thread.id()).into()),
                ThreadState::Ready | ThreadState::Blocked => {}
            },
            Err(error) => return Err(error),
        }
        let landed = self.insert_thread(thread, dest)?;
        log::trace!("thread {} migrated to cpu {}", thread.id(), landed);
        Ok(landed)
    }

    /// Finish a thread: dequeue it and drop it from its process.
    pub fn exit_thread(&self, thread: &Arc<Thread>) -> SchedResult<()> {
        self.ensure_ready()?;
        self.retire(thread);
        let process = thread
            .process()
            .ok_or(ProcessError::Orphaned(thread.id()))?;
        process.detach_thread(thread.id());
        Ok(())
    }

    /// Mark a thread finished and pull it off its run queue.
    ///
    /// `Finished` goes in first so no insert can land after the removal. It
    /// is stored again afterwards because a dispatch racing the removal may
    /// have marked the thread running. A running thread is left to its CPU,
    /// whose next `requeue` drops it.
    fn retire(&self, thread: &Arc<Thread>) {
        thread.set_state(ThreadState::Finished);
        if let Some(resident) = thread.residency() {
            if let Some(local) = self.local(resident.cpu) {
                let _ = local.remove_thread(thread);
            }
        }
        thread.set_state(ThreadState::Finished);
    }

    /// Pick the next thread for the calling CPU.
    pub fn schedule(&self) -> Option<Arc<Thread>> {
        if !self.is_ready() {
            return None;
        }
        let thread = self.local(self.platform.current_cpu())?.pick_next()?;
        log::trace!("dispatch thread {}", thread.id());
        Some(thread)
    }

    /// Return the thread that just ran on the calling CPU.
    ///
    /// If the local scheduler cannot requeue it, the usual insert-failure
    /// policy applies.
    pub fn requeue(&self, thread: Arc<Thread>, ran: Duration, reason: SwitchReason) -> SchedResult<()> {
        self.ensure_ready()?;
        let cpu = self.platform.current_cpu();
        let local = self.local(cpu).ok_or(ScheduleError::InvalidCpu(cpu))?;
        match local.put_prev(thread.clone(), ran, reason) {
            Ok(()) => Ok(()),
            Err(error) => match self.on_thread_insert_failed(&thread, cpu, &error) {
                InsertRemedy::Rehomed(_) => Ok(()),
                InsertRemedy::Dropped => Err(error),
            },
        }
    }
}

impl core::fmt::Debug for GlobalScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlobalScheduler")
            .field("ready", &self.is_ready())
            .field("cpus", &self.cpu_count())
            .field("processes", &self.process_count())
            .finish()
    }
}
