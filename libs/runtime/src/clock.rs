//! Worker-bound quantized clock.
//!
//! ## Purpose
//!
//! Scheduler-bound code reads time on every loop iteration; paying a wall
//! clock syscall each time would dominate an idle worker's profile. The
//! worker clock reads the cheap monotonic counter once per tick and refreshes
//! the cached wall-clock milliseconds only when at least one millisecond of
//! monotonic time has actually elapsed, preserving sub-millisecond monotonic
//! ordering for timers at a fraction of the cost.
//!
//! Each clock instance is bound to the worker thread that created it. Reading
//! it from anywhere else is a programming error and fails with
//! [`RuntimeError::InvalidContext`] instead of returning a value quantized
//! for a tick the caller is not part of.

use std::thread::{self, ThreadId};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::error::{Result, RuntimeError};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Process-wide origin for the monotonic nanosecond counter.
static MONOTONIC_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Quantized wall-clock and monotonic time for one scheduler worker.
#[derive(Debug)]
pub struct WorkerClock {
    owner: ThreadId,
    time_millis: u64,
    nano_time: u64,
    nano_time_of_last_milli: u64,
    nanos_since_last_milli: u64,
}

impl WorkerClock {
    /// Creates a clock owned by the calling thread.
    pub fn new() -> Self {
        let nano_time = MONOTONIC_EPOCH.elapsed().as_nanos() as u64;
        Self {
            owner: thread::current().id(),
            time_millis: wall_clock_millis(),
            nano_time,
            nano_time_of_last_milli: nano_time,
            nanos_since_last_milli: 0,
        }
    }

    /// Refreshes the clock for the next scheduler tick.
    ///
    /// The nanosecond counter is read unconditionally; the cached wall-clock
    /// milliseconds are refreshed only when at least one millisecond of
    /// monotonic time has elapsed since the last refresh. Returns whether a
    /// new millisecond tick occurred.
    pub fn update(&mut self) -> Result<bool> {
        self.check_context()?;
        self.update_nanos();

        if self.nanos_since_last_milli >= NANOS_PER_MILLI {
            self.time_millis = wall_clock_millis();
            self.nano_time_of_last_milli = self.nano_time;
            return Ok(true);
        }
        Ok(false)
    }

    fn update_nanos(&mut self) {
        self.nano_time = MONOTONIC_EPOCH.elapsed().as_nanos() as u64;
        self.nanos_since_last_milli = self.nano_time - self.nano_time_of_last_milli;
    }

    /// Cached wall-clock milliseconds since the Unix epoch, refreshed at most
    /// once per millisecond tick.
    pub fn time_millis(&self) -> Result<u64> {
        self.check_context()?;
        Ok(self.time_millis)
    }

    /// Monotonic nanoseconds since process start, as of the last `update`.
    pub fn nano_time(&self) -> Result<u64> {
        self.check_context()?;
        Ok(self.nano_time)
    }

    /// Monotonic nanoseconds elapsed since the last millisecond refresh.
    pub fn nanos_since_last_milli(&self) -> Result<u64> {
        self.check_context()?;
        Ok(self.nanos_since_last_milli)
    }

    fn check_context(&self) -> Result<()> {
        let caller = thread::current().id();
        if caller != self.owner {
            return Err(RuntimeError::invalid_context(format!(
                "worker clock owned by {:?} accessed from {:?}",
                self.owner, caller
            )));
        }
        Ok(())
    }
}

impl Default for WorkerClock {
    fn default() -> Self {
        Self::new()
    }
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn millisecond_tick_requires_elapsed_monotonic_time() {
        let mut clock = WorkerClock::new();
        thread::sleep(Duration::from_millis(2));
        assert!(clock.update().unwrap());

        let millis = clock.time_millis().unwrap();
        let ticked = clock.update().unwrap();
        if !ticked {
            // Without a tick the cached wall clock must not move.
            assert_eq!(clock.time_millis().unwrap(), millis);
        }
    }

    #[test]
    fn nano_time_is_monotonic_across_updates() {
        let mut clock = WorkerClock::new();
        let first = clock.nano_time().unwrap();
        clock.update().unwrap();
        let second = clock.nano_time().unwrap();
        assert!(second >= first);
    }

    #[test]
    fn access_from_foreign_thread_is_an_invalid_context() {
        let clock = WorkerClock::new();
        let result = thread::spawn(move || clock.nano_time()).join().unwrap();
        assert!(matches!(result, Err(RuntimeError::InvalidContext { .. })));
    }
}
