//! Shared deadline queue for timer-parked tasks.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;

use parking_lot::Mutex;

use crate::task::TaskEntry;

struct TimerEntry {
    deadline_ns: u64,
    sequence: u64,
    entry: TaskEntry,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ns == other.deadline_ns && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline_ns
            .cmp(&other.deadline_ns)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Min-ordered (deadline, task) pairs shared by all workers. Any worker may
/// expire due entries; the sequence number keeps equal deadlines in
/// registration order.
pub(crate) struct TimerQueue {
    heap: Mutex<TimerHeap>,
}

struct TimerHeap {
    entries: BinaryHeap<Reverse<TimerEntry>>,
    next_sequence: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(TimerHeap {
                entries: BinaryHeap::new(),
                next_sequence: 0,
            }),
        }
    }

    pub(crate) fn schedule(&self, deadline_ns: u64, entry: TaskEntry) {
        let mut heap = self.heap.lock();
        let sequence = heap.next_sequence;
        heap.next_sequence += 1;
        heap.entries.push(Reverse(TimerEntry {
            deadline_ns,
            sequence,
            entry,
        }));
    }

    /// Pops one entry whose deadline has passed, if any.
    pub(crate) fn pop_due(&self, now_ns: u64) -> Option<TaskEntry> {
        let mut heap = self.heap.lock();
        if heap
            .entries
            .peek()
            .is_some_and(|Reverse(timer)| timer.deadline_ns <= now_ns)
        {
            return heap.entries.pop().map(|Reverse(timer)| timer.entry);
        }
        None
    }

    /// Earliest registered deadline, for worker park timeouts.
    pub(crate) fn next_deadline_ns(&self) -> Option<u64> {
        self.heap
            .lock()
            .entries
            .peek()
            .map(|Reverse(timer)| timer.deadline_ns)
    }
}
