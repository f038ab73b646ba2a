//! Three-tier SMP local scheduler.
//!
//! Each CPU owns one [`SmpLocalScheduler`] with three tier classes:
//!
//! - five real-time FIFO levels, strictly ahead of everything else,
//! - five high-priority FIFO levels with level-scaled slices,
//! - a fair-share tier ordered by weighted virtual runtime.
//!
//! Every tier class has its own spinlock so a wakeup on one class never
//! contends with dispatch from another. Lock order is tier, then the thread's
//! residency record, then its queue link. Nothing allocates while a tier lock
//! is held: the fair map grows through a reservation made outside the lock.

use alloc::boxed::Box;
use alloc::sync::Arc;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use super::local::{CpuId, LocalScheduler, Residency, SwitchReason, Tier};
use super::queue::TierQueue;
use crate::arch::Platform;
use crate::collections::OrderedMap;
use crate::config::{SchedConfig, TIER_LEVELS};
use crate::errors::{Corruption, InitError, Operation, SchedResult, ScheduleError, Structure};
use crate::thread::{SchedPolicy, ScheduleGroup, Thread, ThreadState};
use crate::time::Duration;

/// Arena entries reserved for the fair tier at `init`.
const FAIR_INITIAL_CAPACITY: usize = 64;

/// Where a thread goes, before any lock is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Realtime(usize),
    HighPriority(usize),
    Fair,
}

struct FairTier {
    map: OrderedMap<Arc<Thread>>,
    /// Monotonic floor for newly queued keys
    min_vruntime: u64,
}

/// Snapshot of how many threads sit in each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierCounts {
    pub realtime: [usize; TIER_LEVELS],
    pub high_priority: [usize; TIER_LEVELS],
    pub fair: usize,
}

impl TierCounts {
    pub fn total(&self) -> usize {
        self.realtime.iter().sum::<usize>() + self.high_priority.iter().sum::<usize>() + self.fair
    }
}

pub struct SmpLocalScheduler {
    cpu: CpuId,
    platform: Arc<dyn Platform>,
    config: SchedConfig,
    initialized: AtomicBool,
    realtime: spin::Mutex<[TierQueue; TIER_LEVELS]>,
    high_priority: spin::Mutex<[TierQueue; TIER_LEVELS]>,
    fair: spin::Mutex<FairTier>,
    queued: AtomicUsize,
}

impl SmpLocalScheduler {
    pub fn new(cpu: CpuId, platform: Arc<dyn Platform>, config: SchedConfig) -> Self {
        Self {
            cpu,
            platform,
            config,
            initialized: AtomicBool::new(false),
            realtime: spin::Mutex::new(core::array::from_fn(|_| TierQueue::new())),
            high_priority: spin::Mutex::new(core::array::from_fn(|_| TierQueue::new())),
            fair: spin::Mutex::new(FairTier {
                map: OrderedMap::new(),
                min_vruntime: 0,
            }),
            queued: AtomicUsize::new(0),
        }
    }

    /// [`LocalSchedulerFactory`](super::LocalSchedulerFactory) for this variant.
    pub fn boxed(cpu: CpuId, platform: Arc<dyn Platform>, config: SchedConfig) -> Box<dyn LocalScheduler> {
        Box::new(Self::new(cpu, platform, config))
    }

    pub fn tier_counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for (count, queue) in counts.realtime.iter_mut().zip(self.realtime.lock().iter()) {
            *count = queue.len();
        }
        for (count, queue) in counts.high_priority.iter_mut().zip(self.high_priority.lock().iter()) {
            *count = queue.len();
        }
        counts.fair = self.fair.lock().map.len();
        counts
    }

    /// Floor of the fair tier's virtual clock.
    pub fn min_vruntime(&self) -> u64 {
        self.fair.lock().min_vruntime
    }

    fn placement(thread: &Thread) -> Result<Placement, ScheduleError> {
        let policy = thread
            .policy()
            .ok_or(ScheduleError::InvalidPolicy(thread.policy_raw()))?;
        let group = thread.group().clamp_to(policy.group_bounds());
        Ok(match (policy, group.level()) {
            (SchedPolicy::SoftRealtime, Some(level)) => Placement::Realtime(level),
            (_, Some(level)) => Placement::HighPriority(level),
            (_, None) => Placement::Fair,
        })
    }

    fn weight(thread: &Thread) -> u64 {
        let weight = thread.priority().weight();
        if thread.group() == ScheduleGroup::Background {
            (weight / 4).max(1)
        } else {
            weight
        }
    }

    #[cold]
    fn corrupted(&self, structure: Structure, operation: Operation, detail: &'static str) -> ! {
        let report = Corruption {
            cpu: self.cpu,
            structure,
            operation,
            detail,
        };
        log::error!("{}", report);
        self.platform.fatal(&report)
    }

    #[cfg(feature = "debug-invariants")]
    fn check_fair(&self, fair: &FairTier, operation: Operation) {
        if let Err(violation) = fair.map.validate() {
            log::error!("cpu {}: fair map invariant broken: {:?}", self.cpu, violation);
            self.corrupted(Structure::FairMap, operation, "red-black invariant violated");
        }
    }

    #[cfg(not(feature = "debug-invariants"))]
    #[inline(always)]
    fn check_fair(&self, _fair: &FairTier, _operation: Operation) {}

    /// Caller holds the thread's residency lock.
    fn mark_queued(&self, thread: &Thread) {
        thread.set_cpu(self.cpu);
        thread.set_state(ThreadState::Ready);
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    fn admissible(thread: &Thread, residency: &Option<Residency>) -> SchedResult<()> {
        if residency.is_some() {
            return Err(ScheduleError::AlreadyQueued(thread.id()).into());
        }
        if thread.state() == ThreadState::Finished {
            return Err(ScheduleError::ThreadFinished(thread.id()).into());
        }
        Ok(())
    }

    /// Clear the residency of a thread just taken off a tier and mark it
    /// running, both under its residency lock.
    fn claim(&self, thread: &Thread) {
        let mut residency = thread.residency_slot().lock();
        if residency.take().is_none() {
            self.corrupted(Structure::Residency, Operation::Dispatch, "queued thread without residency");
        }
        thread.set_state(ThreadState::Running);
    }

    fn enqueue_fifo(
        &self,
        queue: &mut TierQueue,
        structure: Structure,
        tier: Tier,
        thread: &Arc<Thread>,
    ) -> SchedResult<()> {
        let mut residency = thread.residency_slot().lock();
        Self::admissible(thread, &residency)?;
        if let Err(detail) = queue.push_back(thread.clone()) {
            self.corrupted(structure, Operation::Insert, detail);
        }
        *residency = Some(Residency { cpu: self.cpu, tier });
        self.mark_queued(thread);
        Ok(())
    }

    fn insert_fair(&self, thread: &Arc<Thread>) -> SchedResult<()> {
        loop {
            let wanted = {
                let mut fair = self.fair.lock();
                if fair.map.has_spare_slot() {
                    return self.enqueue_fair(&mut fair, thread);
                }
                (fair.map.capacity() * 2).max(FAIR_INITIAL_CAPACITY)
            };
            let reservation = OrderedMap::reservation(wanted).map_err(|_| {
                log::warn!("cpu {}: fair tier cannot grow to {} entries", self.cpu, wanted);
                ScheduleError::OutOfMemory
            })?;
            let retired = self.fair.lock().map.install(reservation);
            drop(retired);
        }
    }

    fn enqueue_fair(&self, fair: &mut FairTier, thread: &Arc<Thread>) -> SchedResult<()> {
        let mut residency = thread.residency_slot().lock();
        Self::admissible(thread, &residency)?;
        // Equal virtual runtimes queue in arrival order.
        let mut key = thread.vruntime().max(fair.min_vruntime);
        while fair.map.contains_key(key) {
            key = key.wrapping_add(1);
        }
        if fair.map.insert(key, thread.clone()).is_err() {
            self.corrupted(Structure::FairMap, Operation::Insert, "insert into a probed free key failed");
        }
        thread.set_vruntime(key);
        *residency = Some(Residency {
            cpu: self.cpu,
            tier: Tier::Fair { key },
        });
        self.mark_queued(thread);
        drop(residency);
        self.check_fair(fair, Operation::Insert);
        Ok(())
    }

    fn dequeue_fifo(
        &self,
        queue: &mut TierQueue,
        structure: Structure,
        thread: &Arc<Thread>,
        expected: Residency,
    ) -> bool {
        let mut residency = thread.residency_slot().lock();
        if *residency != Some(expected) {
            return false;
        }
        match queue.remove(thread) {
            Ok(true) => {}
            Ok(false) => self.corrupted(structure, Operation::Remove, "resident thread missing from its queue"),
            Err(detail) => self.corrupted(structure, Operation::Remove, detail),
        }
        *residency = None;
        true
    }

    fn dispatch_fifo(
        &self,
        tier: &spin::Mutex<[TierQueue; TIER_LEVELS]>,
        structure: fn(usize) -> Structure,
    ) -> Option<Arc<Thread>> {
        let mut queues = tier.lock();
        for (level, queue) in queues.iter_mut().enumerate() {
            match queue.pop_front() {
                Ok(Some(thread)) => {
                    self.claim(&thread);
                    return Some(thread);
                }
                Ok(None) => {}
                Err(detail) => self.corrupted(structure(level), Operation::Dispatch, detail),
            }
        }
        None
    }

    fn dispatch_fair(&self) -> Option<Arc<Thread>> {
        let mut fair = self.fair.lock();
        let (key, thread) = fair.map.pop_leftmost()?;
        fair.min_vruntime = fair.min_vruntime.max(key);
        self.claim(&thread);
        self.check_fair(&fair, Operation::Dispatch);
        Some(thread)
    }
}

impl LocalScheduler for SmpLocalScheduler {
    fn cpu_id(&self) -> CpuId {
        self.cpu
    }

    fn init(&self) -> SchedResult<()> {
        if self.is_initialized() {
            return Err(InitError::AlreadyInitialized.into());
        }
        let reservation =
            OrderedMap::reservation(FAIR_INITIAL_CAPACITY).map_err(|_| ScheduleError::OutOfMemory)?;
        let retired = self.fair.lock().map.install(reservation);
        drop(retired);
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InitError::AlreadyInitialized.into());
        }
        log::debug!("cpu {}: local scheduler initialized", self.cpu);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn insert_thread(&self, thread: &Arc<Thread>) -> SchedResult<()> {
        if !self.is_initialized() {
            return Err(ScheduleError::CpuNotReady(self.cpu).into());
        }
        match Self::placement(thread)? {
            Placement::Realtime(level) => {
                let mut queues = self.realtime.lock();
                self.enqueue_fifo(&mut queues[level], Structure::RealtimeQueue(level), Tier::Realtime(level), thread)
            }
            Placement::HighPriority(level) => {
                let mut queues = self.high_priority.lock();
                self.enqueue_fifo(
                    &mut queues[level],
                    Structure::HighPriorityQueue(level),
                    Tier::HighPriority(level),
                    thread,
                )
            }
            Placement::Fair => self.insert_fair(thread),
        }
    }

    fn remove_thread(&self, thread: &Arc<Thread>) -> SchedResult<()> {
        // The residency is read without the tier lock, so it may move before
        // the lock is taken; re-check under the lock and retry if it did.
        loop {
            let resident = match thread.residency() {
                Some(resident) if resident.cpu == self.cpu => resident,
                _ => return Err(ScheduleError::NotQueued(thread.id()).into()),
            };
            let removed = match resident.tier {
                Tier::Realtime(level) => {
                    let mut queues = self.realtime.lock();
                    match queues.get_mut(level) {
                        Some(queue) => self.dequeue_fifo(queue, Structure::RealtimeQueue(level), thread, resident),
                        None => self.corrupted(Structure::Residency, Operation::Remove, "level out of range"),
                    }
                }
                Tier::HighPriority(level) => {
                    let mut queues = self.high_priority.lock();
                    match queues.get_mut(level) {
                        Some(queue) => {
                            self.dequeue_fifo(queue, Structure::HighPriorityQueue(level), thread, resident)
                        }
                        None => self.corrupted(Structure::Residency, Operation::Remove, "level out of range"),
                    }
                }
                Tier::Fair { key } => {
                    let mut fair = self.fair.lock();
                    let mut residency = thread.residency_slot().lock();
                    if *residency != Some(resident) {
                        false
                    } else {
                        match fair.map.erase(key) {
                            Some(found) if Arc::ptr_eq(&found, thread) => {}
                            _ => self.corrupted(Structure::FairMap, Operation::Remove, "residency key holds another thread"),
                        }
                        *residency = None;
                        drop(residency);
                        self.check_fair(&fair, Operation::Remove);
                        true
                    }
                }
            };
            if removed {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                return Ok(());
            }
        }
    }

    fn pick_next(&self) -> Option<Arc<Thread>> {
        if self.queued.load(Ordering::Acquire) == 0 {
            return None;
        }
        let thread = self
            .dispatch_fifo(&self.realtime, Structure::RealtimeQueue)
            .or_else(|| self.dispatch_fifo(&self.high_priority, Structure::HighPriorityQueue))
            .or_else(|| self.dispatch_fair())?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(thread)
    }

    fn put_prev(&self, thread: Arc<Thread>, ran: Duration, reason: SwitchReason) -> SchedResult<()> {
        let slice = self.time_slice(&thread);
        thread.charge(ran, Self::weight(&thread));

        // Exited while it was running; it only needed its runtime charged.
        if thread.state() == ThreadState::Finished {
            return Ok(());
        }

        match reason {
            SwitchReason::SliceExpired => {
                if thread.note_full_slice() >= self.config.demote_after {
                    thread.reset_full_slices();
                    if let Some(group) = thread.demote() {
                        log::trace!("thread {} demoted to {:?}", thread.id(), group);
                    }
                }
            }
            SwitchReason::Yielded | SwitchReason::Blocked => {
                thread.reset_full_slices();
                if ran.as_nanos() < slice.as_nanos() / self.config.promote_divisor.max(1) {
                    if let Some(group) = thread.promote() {
                        log::trace!("thread {} promoted to {:?}", thread.id(), group);
                    }
                }
            }
            SwitchReason::Exited => {}
        }

        match reason {
            SwitchReason::SliceExpired | SwitchReason::Yielded => self.insert_thread(&thread),
            SwitchReason::Blocked => {
                thread.set_state(ThreadState::Blocked);
                Ok(())
            }
            SwitchReason::Exited => {
                thread.set_state(ThreadState::Finished);
                Ok(())
            }
        }
    }

    fn time_slice(&self, thread: &Thread) -> Duration {
        match Self::placement(thread) {
            Ok(Placement::Realtime(_)) => self.config.realtime_slice,
            Ok(Placement::HighPriority(level)) => {
                Duration::from_nanos(self.config.high_priority_slice.as_nanos().saturating_mul(level as u64 + 1))
            }
            Ok(Placement::Fair) | Err(_) => self.config.fair_slice,
        }
    }

    fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for SmpLocalScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmpLocalScheduler")
            .field("cpu", &self.cpu)
            .field("initialized", &self.is_initialized())
            .field("queued", &self.queued_count())
            .finish()
    }
}
