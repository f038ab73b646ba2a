//! Stress tests for concurrency and high-load scenarios.
//!
//! Every host thread plays one CPU of a shared global scheduler.

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use portable_atomic::{AtomicUsize, Ordering};

use super::helpers::{booted, user_process, SimpleRng, TestBarrier, TestPlatform};
use crate::errors::{SchedError, ScheduleError};
use crate::process::ProcessKind;
use crate::sched::{GlobalScheduler, SwitchReason};
use crate::thread::{SchedPolicy, Thread, ThreadBuilder};
use crate::time::Duration;

/// Every queued thread is counted by exactly the CPU its residency names.
fn assert_consistent(sched: &GlobalScheduler, threads: &[Arc<Thread>]) {
    let mut per_cpu = alloc::vec![0usize; sched.cpu_count()];
    for thread in threads {
        if let Some(resident) = thread.residency() {
            per_cpu[resident.cpu] += 1;
        }
    }
    for (cpu, expected) in per_cpu.into_iter().enumerate() {
        assert_eq!(sched.local(cpu).unwrap().queued_count(), expected, "cpu {}", cpu);
    }
}

#[test]
fn stress_concurrent_insert_remove_across_cpus() {
    const CPUS: usize = 2;
    let (_platform, sched) = booted(CPUS, &[0, 1]);
    let process = user_process(&sched, 10, ProcessKind::UserApplication);
    let threads: Vec<_> = (0..16)
        .map(|i| {
            let policy = if i % 2 == 0 { SchedPolicy::Normal } else { SchedPolicy::Background };
            ThreadBuilder::new()
                .policy(policy)
                .build(sched.allocate_thread_id(), &process, Default::default())
        })
        .collect();
    let barrier = TestBarrier::new(CPUS as u64);

    std::thread::scope(|scope| {
        for cpu in 0..CPUS {
            let (sched, threads, barrier) = (&sched, &threads, &barrier);
            scope.spawn(move || {
                TestPlatform::run_on(cpu);
                let local = sched.local(cpu).unwrap();
                let mut rng = SimpleRng::new(cpu as u64 + 1);
                barrier.wait();
                for _ in 0..5000 {
                    let thread = rng.pick(threads);
                    if rng.gen_bool() {
                        match local.insert_thread(thread) {
                            Ok(()) | Err(SchedError::Schedule(ScheduleError::AlreadyQueued(_))) => {}
                            Err(error) => panic!("unexpected insert failure: {}", error),
                        }
                    } else {
                        match sched.remove_thread(thread) {
                            Ok(()) | Err(SchedError::Schedule(ScheduleError::NotQueued(_))) => {}
                            Err(error) => panic!("unexpected remove failure: {}", error),
                        }
                    }
                }
            });
        }
    });

    assert_consistent(&sched, &threads);
    let total: usize = (0..CPUS).map(|cpu| sched.local(cpu).unwrap().queued_count()).sum();
    assert_eq!(total, threads.iter().filter(|t| t.is_queued()).count());
}

#[test]
fn stress_dispatch_loops_on_every_cpu() {
    const CPUS: usize = 4;
    let (_platform, sched) = booted(CPUS, &[0, 1, 2, 3]);
    let process = user_process(&sched, 10, ProcessKind::UserApplication);
    let mut threads = Vec::new();
    for i in 0..64 {
        let builder = ThreadBuilder::new().cpu(i % CPUS);
        threads.push(sched.spawn_thread(process.id(), builder).unwrap());
    }
    let dispatched = AtomicUsize::new(0);
    let barrier = TestBarrier::new(CPUS as u64);

    std::thread::scope(|scope| {
        for cpu in 0..CPUS {
            let (sched, dispatched, barrier) = (&sched, &dispatched, &barrier);
            scope.spawn(move || {
                TestPlatform::run_on(cpu);
                let mut rng = SimpleRng::new(0x5eed + cpu as u64);
                barrier.wait();
                for _ in 0..2000 {
                    let Some(running) = sched.schedule() else {
                        continue;
                    };
                    dispatched.fetch_add(1, Ordering::Relaxed);
                    let ran = Duration::from_micros(rng.gen_range(1, 12_000));
                    let reason = if rng.gen_bool() { SwitchReason::SliceExpired } else { SwitchReason::Yielded };
                    sched.requeue(running, ran, reason).unwrap();
                }
            });
        }
    });

    assert!(dispatched.load(Ordering::Relaxed) > 0);
    assert!(threads.iter().all(|t| t.is_queued()));
    assert_consistent(&sched, &threads);
}

#[test]
fn stress_parallel_spawn_assigns_unique_ids() {
    const CPUS: usize = 4;
    const PER_CPU: usize = 100;
    let (_platform, sched) = booted(CPUS, &[0, 1, 2, 3]);
    let process = user_process(&sched, 10, ProcessKind::UserBackground);

    let spawned: Vec<Vec<Arc<Thread>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CPUS)
            .map(|cpu| {
                let (sched, process) = (&sched, &process);
                scope.spawn(move || {
                    TestPlatform::run_on(cpu);
                    (0..PER_CPU)
                        .map(|_| sched.spawn_thread(process.id(), ThreadBuilder::new()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let threads: Vec<_> = spawned.into_iter().flatten().collect();
    let ids: BTreeSet<u64> = threads.iter().map(|t| t.id().as_u64()).collect();
    assert_eq!(ids.len(), CPUS * PER_CPU);
    assert_eq!(process.thread_count(), CPUS * PER_CPU);
    assert_consistent(&sched, &threads);
}
