//! Cooperative Actor Scheduler
//!
//! ## Purpose
//!
//! A fixed pool of OS worker threads, each cooperatively multiplexing many
//! tasks with no preemption: a task runs one bounded quantum and voluntarily
//! returns control. Timer waits go through a shared deadline queue checked
//! once per worker loop pass; blocking I/O is handed to external facilities
//! and resumed through task handles.
//!
//! ## Architecture Role
//!
//! ```text
//! submit(task) ──round robin──→ [ worker 0 | worker 1 | … ]
//!                                   │ per loop pass:
//!                                   │   clock.update()
//!                                   │   expire due timers
//!                                   │   run one quantum
//!                                   └→ Yield / Sleep / AwaitExternal / Done
//! ```
//!
//! Every quantum receives a [`TaskContext`] bundling the owning worker's
//! quantized [`WorkerClock`] and the task's cancellation flag; there is no
//! global scheduler or clock singleton to reach for.

pub mod clock;
pub mod error;
pub mod scheduler;
pub mod task;

mod timer;
mod worker;

pub use clock::WorkerClock;
pub use error::{Result, RuntimeError};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerMetrics};
pub use task::{Task, TaskContext, TaskHandle, TaskState, Transition};
