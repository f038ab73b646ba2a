//! Thread builder for configuring thread creation.

use alloc::string::String;
use alloc::sync::Arc;
use portable_atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize};

use super::{Priority, SchedPolicy, ScheduleGroup, Thread, ThreadId, ThreadState, NO_CPU};
use crate::arch::{AddressSpaceHandle, ContextHandle, StackHandle};
use crate::process::Process;
use crate::sched::CpuId;
use crate::time::Instant;

/// Builder for configuring and creating new threads.
///
/// Unset fields fall back to the owning process: its priority, and a policy
/// derived from its [`ProcessKind`](crate::process::ProcessKind).
#[derive(Debug, Clone, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    priority: Option<Priority>,
    /// Raw so that values from outside the kernel can be carried unchecked
    policy: Option<u8>,
    cpu: Option<CpuId>,
    kernel_stack: Option<StackHandle>,
    user_stack: Option<StackHandle>,
    address_space: Option<AddressSpaceHandle>,
    context: Option<ContextHandle>,
}

impl ThreadBuilder {
    /// Create a new thread builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name for debugging purposes.
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = Some(policy as u8);
        self
    }

    /// Set an unvalidated policy value; insertion rejects unknown ones.
    pub fn policy_raw(mut self, raw: u8) -> Self {
        self.policy = Some(raw);
        self
    }

    /// Pin the first placement to a CPU.
    pub fn cpu(mut self, cpu: CpuId) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn requested_cpu(&self) -> Option<CpuId> {
        self.cpu
    }

    pub fn kernel_stack(mut self, stack: StackHandle) -> Self {
        self.kernel_stack = Some(stack);
        self
    }

    pub fn user_stack(mut self, stack: StackHandle) -> Self {
        self.user_stack = Some(stack);
        self
    }

    pub fn address_space(mut self, address_space: AddressSpaceHandle) -> Self {
        self.address_space = Some(address_space);
        self
    }

    pub fn context(mut self, context: ContextHandle) -> Self {
        self.context = Some(context);
        self
    }

    /// Create the thread record. It is not filed in the process directory
    /// nor queued anywhere yet.
    pub fn build(self, id: ThreadId, process: &Arc<Process>, now: Instant) -> Arc<Thread> {
        let policy = self
            .policy
            .unwrap_or_else(|| process.kind().default_policy() as u8);
        let group = SchedPolicy::from_raw(policy)
            .map(SchedPolicy::initial_group)
            .unwrap_or(ScheduleGroup::Normal);
        let name = self.name.unwrap_or_else(|| alloc::format!("{}:{}", process.name(), id));

        Arc::new(Thread {
            id,
            process: Arc::downgrade(process),
            name,
            created: now,
            priority: AtomicU8::new(self.priority.unwrap_or(process.priority()) as u8),
            policy: AtomicU8::new(policy),
            group: AtomicU8::new(group as u8),
            state: AtomicU8::new(ThreadState::Ready as u8),
            cpu: AtomicUsize::new(self.cpu.unwrap_or(NO_CPU)),
            runtime: AtomicU64::new(0),
            vruntime: AtomicU64::new(0),
            full_slices: AtomicU32::new(0),
            kernel_stack: self.kernel_stack,
            user_stack: self.user_stack,
            address_space: self.address_space,
            context: spin::Mutex::new(self.context),
            residency: spin::Mutex::new(None),
            next: spin::Mutex::new(None),
        })
    }
}
