//! Fixed worker pool multiplexing cooperative tasks.
//!
//! ## Scheduling model
//!
//! A fixed set of OS threads (workers) each runs a non-preemptive loop over a
//! private run queue; timers live in a queue shared by all workers. Tasks are
//! distributed round-robin on submission and stay with their worker while
//! they yield, which keeps pickup bounded by that worker's queue length and
//! services each queue in arrival order.
//!
//! Cancellation is cooperative: the flag is observed at resumption points and
//! a cancelled task receives no further quanta once observed. A panic inside
//! one task's quantum closes that task with its failure message; a fault in
//! scheduler bookkeeping itself terminates the affected worker.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::task::{Task, TaskEntry, TaskHandle, TaskShared, TaskState};
use crate::timer::TimerQueue;
use crate::worker;

/// Construction-time scheduler configuration; not re-validated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Name prefix for worker threads and diagnostics.
    pub name: String,
    /// Number of OS worker threads. Fixed for the scheduler's lifetime.
    pub worker_count: usize,
    /// How long an idle worker parks between queue checks.
    pub idle_park: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "scheduler".to_string(),
            worker_count: 2,
            idle_park: Duration::from_millis(1),
        }
    }
}

/// Counters exposed for tests and operational visibility.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub tasks_submitted: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_cancelled: AtomicU64,
    pub quanta_executed: AtomicU64,
}

pub(crate) struct WorkerQueue {
    queue: Mutex<VecDeque<TaskEntry>>,
    ready: Condvar,
}

pub(crate) struct SchedulerCore {
    pub(crate) name: String,
    pub(crate) idle_park: Duration,
    pub(crate) timers: TimerQueue,
    pub(crate) shutdown: AtomicBool,
    pub(crate) metrics: SchedulerMetrics,
    workers: Vec<WorkerQueue>,
    /// Tasks parked with `Transition::AwaitExternal`, keyed by task id.
    pending: Mutex<HashMap<u64, TaskEntry>>,
    next_task_id: AtomicU64,
    round_robin: AtomicUsize,
}

impl SchedulerCore {
    pub(crate) fn enqueue(&self, worker_index: usize, entry: TaskEntry) {
        entry.shared.set_state(TaskState::Queued);
        let worker = &self.workers[worker_index];
        worker.queue.lock().push_back(entry);
        worker.ready.notify_one();
    }

    pub(crate) fn enqueue_round_robin(&self, entry: TaskEntry) {
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.enqueue(index, entry);
    }

    pub(crate) fn pop(&self, worker_index: usize) -> Option<TaskEntry> {
        self.workers[worker_index].queue.lock().pop_front()
    }

    /// Parks the worker until new work arrives or the timeout elapses.
    pub(crate) fn park(&self, worker_index: usize, timeout: Duration) {
        let worker = &self.workers[worker_index];
        let mut queue = worker.queue.lock();
        if queue.is_empty() && !self.shutdown.load(Ordering::Acquire) {
            worker.ready.wait_for(&mut queue, timeout);
        }
    }

    pub(crate) fn park_pending(&self, entry: TaskEntry) {
        self.pending.lock().insert(entry.shared.id, entry);
    }

    pub(crate) fn resume(&self, task_id: u64) -> bool {
        match self.pending.lock().remove(&task_id) {
            Some(entry) => {
                self.enqueue_round_robin(entry);
                true
            }
            None => false,
        }
    }

    fn notify_all_workers(&self) {
        for worker in &self.workers {
            worker.ready.notify_all();
        }
    }
}

/// Cooperative actor scheduler owning a fixed pool of worker threads.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(RuntimeError::configuration(
                "scheduler requires at least one worker",
            ));
        }

        let workers = (0..config.worker_count)
            .map(|_| WorkerQueue {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            })
            .collect();

        let core = Arc::new(SchedulerCore {
            name: config.name.clone(),
            idle_park: config.idle_park,
            timers: TimerQueue::new(),
            shutdown: AtomicBool::new(false),
            metrics: SchedulerMetrics::default(),
            workers,
            pending: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(0),
            round_robin: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let core = Arc::clone(&core);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.name, index))
                .spawn(move || worker::worker_main(core, index))
                .map_err(|err| {
                    RuntimeError::configuration(format!("failed to spawn worker thread: {err}"))
                })?;
            handles.push(handle);
        }

        info!(
            scheduler = %config.name,
            workers = config.worker_count,
            "started scheduler"
        );
        Ok(Self { core, handles })
    }

    /// Submits a task for execution and returns its handle.
    pub fn submit(&self, task: impl Task) -> Result<TaskHandle> {
        if self.core.shutdown.load(Ordering::Acquire) {
            return Err(RuntimeError::Terminated {
                name: self.core.name.clone(),
            });
        }

        let id = self.core.next_task_id.fetch_add(1, Ordering::Relaxed);
        let shared = TaskShared::new(id);
        let handle = TaskHandle {
            shared: Arc::clone(&shared),
            core: Arc::downgrade(&self.core),
        };

        self.core.metrics.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.core.enqueue_round_robin(TaskEntry {
            task: Box::new(task),
            shared,
        });
        Ok(handle)
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.core.metrics
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops the workers after their in-flight quanta and joins them. Tasks
    /// still queued or parked are abandoned; owners that need a graceful stop
    /// cancel their tasks first.
    pub fn close(mut self) {
        self.close_internal();
    }

    fn close_internal(&mut self) {
        if self.core.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.notify_all_workers();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!(scheduler = %self.core.name, "scheduler closed");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.close_internal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, Transition};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn scheduler(workers: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            name: "test-sched".to_string(),
            worker_count: workers,
            idle_park: Duration::from_millis(1),
        })
        .expect("scheduler starts")
    }

    fn wait_closed(handle: &TaskHandle) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_closed() {
            assert!(Instant::now() < deadline, "task did not close in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    struct YieldingCounter {
        counter: Arc<AtomicUsize>,
        remaining: usize,
    }

    impl Task for YieldingCounter {
        fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Transition {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.remaining == 0 {
                return Transition::Done;
            }
            self.remaining -= 1;
            Transition::Yield
        }
    }

    #[test]
    fn rejects_zero_workers() {
        let result = Scheduler::new(SchedulerConfig {
            worker_count: 0,
            ..SchedulerConfig::default()
        });
        assert!(matches!(result, Err(RuntimeError::Configuration { .. })));
    }

    #[test]
    fn yielding_task_runs_one_quantum_per_pickup() {
        let sched = scheduler(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = sched
            .submit(YieldingCounter {
                counter: Arc::clone(&counter),
                remaining: 4,
            })
            .unwrap();

        wait_closed(&handle);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(handle.state(), TaskState::Closed);
        sched.close();
    }

    #[test]
    fn sleeping_task_resumes_after_its_deadline() {
        struct SleepOnce {
            started: Arc<AtomicUsize>,
            slept: bool,
        }
        impl Task for SleepOnce {
            fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Transition {
                if !self.slept {
                    self.slept = true;
                    return Transition::Sleep(Duration::from_millis(20));
                }
                self.started.fetch_add(1, Ordering::SeqCst);
                Transition::Done
            }
        }

        let sched = scheduler(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let begun = Instant::now();
        let handle = sched
            .submit(SleepOnce {
                started: Arc::clone(&finished),
                slept: false,
            })
            .unwrap();

        wait_closed(&handle);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(begun.elapsed() >= Duration::from_millis(20));
        sched.close();
    }

    #[test]
    fn cancelled_task_receives_no_further_quanta() {
        struct Forever(Arc<AtomicUsize>);
        impl Task for Forever {
            fn run(&mut self, ctx: &mut TaskContext<'_>) -> Transition {
                if ctx.is_cancelled() {
                    return Transition::Done;
                }
                self.0.fetch_add(1, Ordering::SeqCst);
                Transition::Sleep(Duration::from_millis(5))
            }
        }

        let sched = scheduler(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = sched.submit(Forever(Arc::clone(&counter))).unwrap();

        while counter.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle.cancel();
        wait_closed(&handle);

        let at_close = counter.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(counter.load(Ordering::SeqCst), at_close);
        sched.close();
    }

    #[test]
    fn panicking_task_is_isolated_from_other_tasks() {
        struct Exploder;
        impl Task for Exploder {
            fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Transition {
                panic!("boom in quantum");
            }
        }

        let sched = scheduler(1);
        let exploder = sched.submit(Exploder).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let survivor = sched
            .submit(YieldingCounter {
                counter: Arc::clone(&counter),
                remaining: 2,
            })
            .unwrap();

        wait_closed(&exploder);
        wait_closed(&survivor);

        assert_eq!(exploder.state(), TaskState::Closed);
        assert!(exploder.failure().unwrap().contains("boom in quantum"));
        assert!(survivor.failure().is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(sched.metrics().tasks_failed.load(Ordering::Relaxed), 1);
        sched.close();
    }

    #[test]
    fn await_external_parks_until_resumed() {
        struct Handoff {
            resumed: Arc<AtomicUsize>,
            parked: bool,
        }
        impl Task for Handoff {
            fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Transition {
                if !self.parked {
                    self.parked = true;
                    return Transition::AwaitExternal;
                }
                self.resumed.fetch_add(1, Ordering::SeqCst);
                Transition::Done
            }
        }

        let sched = scheduler(2);
        let resumed = Arc::new(AtomicUsize::new(0));
        let handle = sched
            .submit(Handoff {
                resumed: Arc::clone(&resumed),
                parked: false,
            })
            .unwrap();

        // Let the task reach its parked state, then hand the result back.
        while handle.state() != TaskState::BlockedOnIo {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.resume().unwrap());
        wait_closed(&handle);
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        // A second resume finds nothing parked.
        assert!(!handle.resume().unwrap());
        sched.close();
    }

    #[test]
    fn resume_after_close_reports_terminated() {
        struct ParkForever;
        impl Task for ParkForever {
            fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Transition {
                Transition::AwaitExternal
            }
        }

        let sched = scheduler(1);
        let handle = sched.submit(ParkForever).unwrap();
        while handle.state() != TaskState::BlockedOnIo {
            std::thread::sleep(Duration::from_millis(1));
        }

        sched.close();
        assert!(matches!(
            handle.resume(),
            Err(RuntimeError::Terminated { .. })
        ));
    }
}
