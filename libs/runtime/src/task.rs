//! Schedulable tasks, their lifecycle states and handles.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;

use crate::clock::WorkerClock;
use crate::error::{Result, RuntimeError};
use crate::scheduler::SchedulerCore;

/// A cooperatively scheduled unit of work.
///
/// `run` executes one bounded quantum and must voluntarily return control;
/// there is no preemption mid-quantum. Blocking inside a quantum is a design
/// bug, not a runtime-checked condition: blocking work is handed to an
/// external facility with [`Transition::AwaitExternal`] and resumed through
/// the task's [`TaskHandle`].
pub trait Task: Send + 'static {
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Transition;
}

/// What a task wants to happen after the quantum it just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Re-queue behind the other ready tasks of this worker.
    Yield,
    /// Park until the deadline, then re-queue.
    Sleep(Duration),
    /// Park until an external facility calls [`TaskHandle::resume`].
    AwaitExternal,
    /// Finalize the task.
    Done,
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TaskState {
    New = 0,
    Queued = 1,
    Running = 2,
    BlockedOnTimer = 3,
    BlockedOnIo = 4,
    Closed = 5,
}

/// State shared between a task's handle and the scheduler bookkeeping.
pub(crate) struct TaskShared {
    pub(crate) id: u64,
    state: AtomicU8,
    cancelled: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl TaskShared {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::New.into()),
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        })
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(TaskState::Closed)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state.into(), Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self, failure: Option<String>) {
        if let Some(message) = failure {
            *self.failure.lock() = Some(message);
        }
        self.set_state(TaskState::Closed);
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

/// A task together with its shared bookkeeping, owned by the scheduler.
pub(crate) struct TaskEntry {
    pub(crate) task: Box<dyn Task>,
    pub(crate) shared: Arc<TaskShared>,
}

/// Per-quantum execution context handed to [`Task::run`].
///
/// Bundles the current worker's clock and the task's cancellation flag, so
/// tasks never reach for process-global scheduler state.
pub struct TaskContext<'a> {
    clock: &'a WorkerClock,
    shared: &'a TaskShared,
    worker_name: &'a str,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(clock: &'a WorkerClock, shared: &'a TaskShared, worker_name: &'a str) -> Self {
        Self {
            clock,
            shared,
            worker_name,
        }
    }

    /// The owning worker's quantized clock.
    pub fn clock(&self) -> &WorkerClock {
        self.clock
    }

    /// Cooperative cancellation flag; tasks observe it at resumption points
    /// and should finish with [`Transition::Done`] once set.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn worker_name(&self) -> &str {
        self.worker_name
    }
}

/// External handle to a submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) shared: Arc<TaskShared>,
    pub(crate) core: Weak<SchedulerCore>,
}

impl TaskHandle {
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TaskState::Closed
    }

    /// Failure message when the task's last quantum panicked.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure()
    }

    /// Requests cooperative cancellation. The task receives no further quanta
    /// once the scheduler observes the flag at a resumption point; an
    /// in-flight quantum always runs to its next yield.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    /// Re-queues a task parked with [`Transition::AwaitExternal`].
    ///
    /// Returns `false` when the task was not parked for external work (it may
    /// have been cancelled or closed in the meantime).
    pub fn resume(&self) -> Result<bool> {
        let core = self.core.upgrade().ok_or_else(|| RuntimeError::Terminated {
            name: "scheduler".to_string(),
        })?;
        Ok(core.resume(self.shared.id))
    }
}
