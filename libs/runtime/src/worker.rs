//! Worker thread loop: one bounded quantum at a time, no preemption.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::clock::WorkerClock;
use crate::error::Result;
use crate::scheduler::SchedulerCore;
use crate::task::{TaskContext, TaskEntry, TaskState, Transition};

pub(crate) fn worker_main(core: Arc<SchedulerCore>, index: usize) {
    let worker_name = format!("{}-{}", core.name, index);
    let mut clock = WorkerClock::new();
    debug!(worker = %worker_name, "worker started");

    loop {
        if let Err(err) = tick(&core, index, &worker_name, &mut clock) {
            // A fault in scheduler bookkeeping itself is fatal for this
            // worker; task faults never reach here.
            error!(worker = %worker_name, %err, "bookkeeping fault, terminating worker");
            break;
        }
        if core.shutdown.load(Ordering::Acquire) {
            break;
        }
    }

    debug!(worker = %worker_name, "worker stopped");
}

fn tick(
    core: &Arc<SchedulerCore>,
    index: usize,
    worker_name: &str,
    clock: &mut WorkerClock,
) -> Result<()> {
    clock.update()?;
    let now_ns = clock.nano_time()?;

    // Timers are checked once per loop pass; due tasks are re-queued on the
    // worker that observed the deadline.
    while let Some(entry) = core.timers.pop_due(now_ns) {
        core.enqueue(index, entry);
    }

    match core.pop(index) {
        Some(entry) => run_quantum(core, index, worker_name, clock, now_ns, entry),
        None => {
            let timeout = park_timeout(core, now_ns);
            core.park(index, timeout);
        }
    }
    Ok(())
}

fn park_timeout(core: &SchedulerCore, now_ns: u64) -> Duration {
    match core.timers.next_deadline_ns() {
        Some(deadline) if deadline <= now_ns => Duration::ZERO,
        Some(deadline) => core.idle_park.min(Duration::from_nanos(deadline - now_ns)),
        None => core.idle_park,
    }
}

fn run_quantum(
    core: &Arc<SchedulerCore>,
    index: usize,
    worker_name: &str,
    clock: &WorkerClock,
    now_ns: u64,
    mut entry: TaskEntry,
) {
    // Cancellation is observed at resumption points: a cancelled task is
    // finalized instead of receiving another quantum.
    if entry.shared.is_cancelled() {
        debug!(worker = %worker_name, task = entry.shared.id, "closing cancelled task");
        entry.shared.close(None);
        core.metrics.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }

    entry.shared.set_state(TaskState::Running);
    let outcome = {
        let mut ctx = TaskContext::new(clock, &entry.shared, worker_name);
        panic::catch_unwind(AssertUnwindSafe(|| entry.task.run(&mut ctx)))
    };
    core.metrics.quanta_executed.fetch_add(1, Ordering::Relaxed);

    match outcome {
        Ok(Transition::Yield) => core.enqueue(index, entry),
        Ok(Transition::Sleep(duration)) => {
            entry.shared.set_state(TaskState::BlockedOnTimer);
            let deadline_ns = now_ns.saturating_add(duration.as_nanos() as u64);
            core.timers.schedule(deadline_ns, entry);
        }
        Ok(Transition::AwaitExternal) => {
            // Park before publishing the state so a resume that races this
            // transition always finds the parked entry.
            let shared = Arc::clone(&entry.shared);
            core.park_pending(entry);
            shared.set_state(TaskState::BlockedOnIo);
        }
        Ok(Transition::Done) => {
            entry.shared.close(None);
            core.metrics.tasks_completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(payload) => {
            let message = panic_message(payload);
            warn!(
                worker = %worker_name,
                task = entry.shared.id,
                failure = %message,
                "task quantum panicked, closing task"
            );
            entry.shared.close(Some(message));
            core.metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
