//! Thread records and their scheduling attributes.
//!
//! A [`Thread`] is shared as `Arc<Thread>`: its owning process files it in a
//! per-process directory and at most one tier of one local scheduler holds it
//! while it is ready. Fields the scheduler changes concurrently are atomics;
//! the tier residency record and the intrusive queue link sit behind their
//! own short spinlocks and are only written while the owning tier's lock is
//! held (lock order: tier, then residency, then link).

use core::num::NonZeroU64;

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use portable_atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::arch::{AddressSpaceHandle, ContextHandle, StackHandle};
use crate::config::NICE_0_WEIGHT;
use crate::process::Process;
use crate::sched::{CpuId, Residency};
use crate::time::{Duration, Instant};

pub mod builder;

pub use builder::ThreadBuilder;

/// Unique identifier for threads.
///
/// Thread IDs are never reused and are guaranteed to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a thread ID; zero is not a valid id.
    pub const fn new(id: u64) -> Option<Self> {
        match NonZeroU64::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Get the ID as u64 (also its key in process directories).
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

/// Thread priority. Within the fair-share tier it sets the weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Minimum = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Maximum = 4,
}

impl Priority {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Priority::Minimum),
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            4 => Some(Priority::Maximum),
            _ => None,
        }
    }

    /// Fair-share weight; `Normal` is [`NICE_0_WEIGHT`].
    pub const fn weight(self) -> u64 {
        match self {
            Priority::Minimum => 110,
            Priority::Low => 335,
            Priority::Normal => NICE_0_WEIGHT,
            Priority::High => 3121,
            Priority::Maximum => 9548,
        }
    }
}

/// Scheduling policy: which tier class a thread belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedPolicy {
    Normal = 0,
    HighPriority = 1,
    SoftRealtime = 2,
    Background = 3,
}

impl SchedPolicy {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SchedPolicy::Normal),
            1 => Some(SchedPolicy::HighPriority),
            2 => Some(SchedPolicy::SoftRealtime),
            3 => Some(SchedPolicy::Background),
            _ => None,
        }
    }

    /// Group a thread of this policy starts in.
    pub const fn initial_group(self) -> ScheduleGroup {
        match self {
            SchedPolicy::SoftRealtime => ScheduleGroup::Realtime0,
            SchedPolicy::HighPriority | SchedPolicy::Normal => ScheduleGroup::High0,
            SchedPolicy::Background => ScheduleGroup::Background,
        }
    }

    /// Lowest and highest group reachable by demotion/promotion.
    ///
    /// Real-time threads never leave the real-time class and nothing else is
    /// ever promoted into it.
    pub const fn group_bounds(self) -> (ScheduleGroup, ScheduleGroup) {
        match self {
            SchedPolicy::SoftRealtime => (ScheduleGroup::Realtime4, ScheduleGroup::Realtime0),
            SchedPolicy::HighPriority => (ScheduleGroup::High4, ScheduleGroup::High0),
            SchedPolicy::Normal => (ScheduleGroup::Normal, ScheduleGroup::High0),
            SchedPolicy::Background => (ScheduleGroup::Background, ScheduleGroup::Normal),
        }
    }
}

/// Fine-grained classification used for promotion and demotion.
///
/// Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ScheduleGroup {
    Background = 0,
    Normal = 1,
    High4 = 2,
    High3 = 3,
    High2 = 4,
    High1 = 5,
    High0 = 6,
    Realtime4 = 7,
    Realtime3 = 8,
    Realtime2 = 9,
    Realtime1 = 10,
    Realtime0 = 11,
}

impl ScheduleGroup {
    pub fn from_raw(raw: u8) -> Option<Self> {
        use ScheduleGroup::*;
        const ALL: [ScheduleGroup; 12] = [
            Background, Normal, High4, High3, High2, High1, High0, Realtime4, Realtime3, Realtime2,
            Realtime1, Realtime0,
        ];
        ALL.get(usize::from(raw)).copied()
    }

    /// Queue level inside the real-time or high-priority class (0 = most
    /// urgent), or `None` for the fair-share groups.
    pub fn level(self) -> Option<usize> {
        let raw = self as u8;
        match self {
            ScheduleGroup::Background | ScheduleGroup::Normal => None,
            g if g <= ScheduleGroup::High0 => Some(usize::from(ScheduleGroup::High0 as u8 - raw)),
            _ => Some(usize::from(ScheduleGroup::Realtime0 as u8 - raw)),
        }
    }

    pub fn is_realtime(self) -> bool {
        self >= ScheduleGroup::Realtime4
    }

    /// Clamp into `[low, high]`.
    pub fn clamp_to(self, (low, high): (ScheduleGroup, ScheduleGroup)) -> ScheduleGroup {
        self.max(low).min(high)
    }
}

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is ready to run
    Ready = 0,
    /// Thread is currently running
    Running = 1,
    /// Thread is blocked waiting for something
    Blocked = 2,
    /// Thread has finished execution
    Finished = 3,
}

/// Sentinel for "no CPU assigned yet".
const NO_CPU: usize = usize::MAX;

/// A schedulable thread.
pub struct Thread {
    id: ThreadId,
    process: Weak<Process>,
    name: String,
    created: Instant,
    priority: AtomicU8,
    /// Raw policy value; may hold values no [`SchedPolicy`] maps to
    policy: AtomicU8,
    group: AtomicU8,
    state: AtomicU8,
    cpu: AtomicUsize,
    runtime: AtomicU64,
    vruntime: AtomicU64,
    /// Consecutive slices consumed in full
    full_slices: AtomicU32,
    kernel_stack: Option<StackHandle>,
    user_stack: Option<StackHandle>,
    address_space: Option<AddressSpaceHandle>,
    context: spin::Mutex<Option<ContextHandle>>,
    residency: spin::Mutex<Option<Residency>>,
    next: spin::Mutex<Option<Arc<Thread>>>,
}

impl Thread {
    /// Get the thread's unique identifier.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Owning process, if it still exists.
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn priority(&self) -> Priority {
        Priority::from_raw(self.priority.load(Ordering::Acquire)).unwrap_or(Priority::Normal)
    }

    /// Takes effect the next time the thread is charged or queued.
    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority as u8, Ordering::Release);
    }

    /// Scheduling policy, or `None` if the raw value is unrecognized.
    pub fn policy(&self) -> Option<SchedPolicy> {
        SchedPolicy::from_raw(self.policy_raw())
    }

    pub fn policy_raw(&self) -> u8 {
        self.policy.load(Ordering::Acquire)
    }

    /// Change policy; the schedule group restarts at the policy's initial
    /// group. Applies on the next insertion.
    pub fn set_policy(&self, policy: SchedPolicy) {
        self.policy.store(policy as u8, Ordering::Release);
        self.group.store(policy.initial_group() as u8, Ordering::Release);
        self.full_slices.store(0, Ordering::Release);
    }

    pub fn group(&self) -> ScheduleGroup {
        ScheduleGroup::from_raw(self.group.load(Ordering::Acquire)).unwrap_or(ScheduleGroup::Normal)
    }

    pub(crate) fn set_group(&self, group: ScheduleGroup) {
        self.group.store(group as u8, Ordering::Release);
    }

    /// Move one group toward background within the policy's bounds.
    pub(crate) fn demote(&self) -> Option<ScheduleGroup> {
        let policy = self.policy()?;
        let (low, _) = policy.group_bounds();
        let current = self.group();
        if current <= low {
            return None;
        }
        let lowered = ScheduleGroup::from_raw(current as u8 - 1)?.clamp_to(policy.group_bounds());
        self.set_group(lowered);
        Some(lowered)
    }

    /// Move one group toward high priority within the policy's bounds.
    pub(crate) fn promote(&self) -> Option<ScheduleGroup> {
        let policy = self.policy()?;
        let (_, high) = policy.group_bounds();
        let current = self.group();
        if current >= high {
            return None;
        }
        let raised = ScheduleGroup::from_raw(current as u8 + 1)?.clamp_to(policy.group_bounds());
        self.set_group(raised);
        Some(raised)
    }

    pub fn state(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            0 => ThreadState::Ready,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Finished,
        }
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// CPU the thread was last assigned to.
    pub fn cpu(&self) -> Option<CpuId> {
        match self.cpu.load(Ordering::Acquire) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Release);
    }

    /// Total time actually spent running.
    pub fn runtime(&self) -> Duration {
        Duration::from_nanos(self.runtime.load(Ordering::Acquire))
    }

    /// Weighted virtual runtime in nanoseconds.
    pub fn vruntime(&self) -> u64 {
        self.vruntime.load(Ordering::Acquire)
    }

    pub(crate) fn set_vruntime(&self, vruntime: u64) {
        self.vruntime.store(vruntime, Ordering::Release);
    }

    /// Account `ran` of real time at fair-share `weight`; returns the new
    /// virtual runtime.
    pub(crate) fn charge(&self, ran: Duration, weight: u64) -> u64 {
        let nanos = ran.as_nanos();
        self.runtime.fetch_add(nanos, Ordering::AcqRel);
        let scaled = u128::from(nanos) * u128::from(NICE_0_WEIGHT) / u128::from(weight.max(1));
        let delta = u64::try_from(scaled).unwrap_or(u64::MAX);
        let previous = self
            .vruntime
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |vruntime| {
                Some(vruntime.saturating_add(delta))
            })
            .unwrap_or_else(|vruntime| vruntime);
        previous.saturating_add(delta)
    }

    /// Count one more slice consumed in full; returns the streak length.
    pub(crate) fn note_full_slice(&self) -> u32 {
        self.full_slices.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_full_slices(&self) {
        self.full_slices.store(0, Ordering::Release);
    }

    pub fn kernel_stack(&self) -> Option<StackHandle> {
        self.kernel_stack
    }

    pub fn user_stack(&self) -> Option<StackHandle> {
        self.user_stack
    }

    pub fn address_space(&self) -> Option<AddressSpaceHandle> {
        self.address_space
    }

    /// Saved register context, as handed over by the arch layer.
    pub fn context(&self) -> Option<ContextHandle> {
        *self.context.lock()
    }

    pub fn set_context(&self, context: Option<ContextHandle>) {
        *self.context.lock() = context;
    }

    /// Tier this thread currently occupies, if any.
    pub fn residency(&self) -> Option<Residency> {
        *self.residency.lock()
    }

    pub fn is_queued(&self) -> bool {
        self.residency().is_some()
    }

    /// Residency record; callers must hold the lock of the tier it names
    /// (or is about to name).
    pub(crate) fn residency_slot(&self) -> &spin::Mutex<Option<Residency>> {
        &self.residency
    }

    /// Intrusive FIFO link; only touched under the owning queue's tier lock.
    pub(crate) fn link(&self) -> &spin::Mutex<Option<Arc<Thread>>> {
        &self.next
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.policy_raw())
            .field("group", &self.group())
            .field("state", &self.state())
            .field("residency", &self.residency())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Process, ProcessId, ProcessKind};

    fn thread(policy: SchedPolicy) -> Arc<Thread> {
        let process = Process::new(ProcessId::new(7), ProcessKind::UserApplication, Priority::Normal, "app");
        ThreadBuilder::new()
            .name("worker")
            .policy(policy)
            .build(ThreadId::new(1).unwrap(), &process, Instant::from_nanos(5))
    }

    #[test]
    fn test_thread_id_rejects_zero() {
        assert!(ThreadId::new(0).is_none());
        assert_eq!(ThreadId::new(42).map(ThreadId::as_u64), Some(42));
    }

    #[test]
    fn test_group_levels() {
        assert_eq!(ScheduleGroup::High0.level(), Some(0));
        assert_eq!(ScheduleGroup::High4.level(), Some(4));
        assert_eq!(ScheduleGroup::Realtime0.level(), Some(0));
        assert_eq!(ScheduleGroup::Realtime3.level(), Some(3));
        assert_eq!(ScheduleGroup::Normal.level(), None);
        assert_eq!(ScheduleGroup::from_raw(12), None);
        assert!(ScheduleGroup::Realtime4.is_realtime());
        assert!(!ScheduleGroup::High0.is_realtime());
    }

    #[test]
    fn test_realtime_never_leaves_class() {
        let t = thread(SchedPolicy::SoftRealtime);
        assert_eq!(t.group(), ScheduleGroup::Realtime0);
        for _ in 0..10 {
            t.demote();
        }
        assert_eq!(t.group(), ScheduleGroup::Realtime4);
        assert!(t.demote().is_none());
        assert!(t.group().is_realtime());
    }

    #[test]
    fn test_high_priority_never_promoted_into_realtime() {
        let t = thread(SchedPolicy::HighPriority);
        assert_eq!(t.group(), ScheduleGroup::High0);
        assert!(t.promote().is_none());
        assert_eq!(t.group(), ScheduleGroup::High0);
    }

    #[test]
    fn test_normal_policy_falls_to_fair_tier() {
        let t = thread(SchedPolicy::Normal);
        for _ in 0..5 {
            t.demote();
        }
        assert_eq!(t.group(), ScheduleGroup::Normal);
        assert!(t.demote().is_none());
        assert_eq!(t.promote(), Some(ScheduleGroup::High4));
    }

    #[test]
    fn test_background_bounds() {
        let t = thread(SchedPolicy::Background);
        assert_eq!(t.promote(), Some(ScheduleGroup::Normal));
        assert!(t.promote().is_none());
        assert_eq!(t.demote(), Some(ScheduleGroup::Background));
    }

    #[test]
    fn test_charge_is_weighted() {
        let t = thread(SchedPolicy::Background);
        let v = t.charge(Duration::from_micros(1), NICE_0_WEIGHT);
        assert_eq!(v, 1_000);
        let v = t.charge(Duration::from_micros(1), NICE_0_WEIGHT * 2);
        assert_eq!(v, 1_500);
        assert_eq!(t.runtime(), Duration::from_micros(2));
    }

    #[test]
    fn test_charge_saturates() {
        let t = thread(SchedPolicy::Normal);
        t.set_vruntime(u64::MAX - 10);
        let v = t.charge(Duration::from_micros(1), NICE_0_WEIGHT);
        assert_eq!(v, u64::MAX);
        assert_eq!(t.vruntime(), u64::MAX);
    }

    #[test]
    fn test_invalid_policy_is_representable() {
        let process = Process::new(ProcessId::new(7), ProcessKind::UserApplication, Priority::Normal, "app");
        let t = ThreadBuilder::new()
            .policy_raw(200)
            .build(ThreadId::new(2).unwrap(), &process, Instant::from_nanos(0));
        assert_eq!(t.policy(), None);
        assert_eq!(t.policy_raw(), 200);
        assert!(t.demote().is_none());
        assert!(t.promote().is_none());
    }
}
