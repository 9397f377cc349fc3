/*
 * Sleep Queue
 *
 * Threads waiting out a deadline, ordered by ascending wake tick with
 * descending priority as the tie-break. Keeping the queue sorted makes
 * the per-tick check O(1): the tick handler only ever looks at the head,
 * and total wake-up work equals the number of threads actually due.
 */

use alloc::vec::Vec;

use super::thread::Tid;

struct Sleeper {
    wake_tick: u64,
    /// Priority at insertion time, used only to order simultaneous wakes.
    priority: i32,
    tid: Tid,
}

pub(super) struct SleepQueue {
    sleepers: Vec<Sleeper>,
}

impl SleepQueue {
    pub(super) const fn new() -> Self {
        Self { sleepers: Vec::new() }
    }

    pub(super) fn reserve(&mut self, capacity: usize) {
        self.sleepers.reserve(capacity);
    }

    /// Insert a sleeper, keeping the deadline order.
    pub(super) fn insert(&mut self, tid: Tid, wake_tick: u64, priority: i32) {
        let pos = self
            .sleepers
            .iter()
            .position(|s| (s.wake_tick, -s.priority) > (wake_tick, -priority))
            .unwrap_or(self.sleepers.len());
        self.sleepers.insert(pos, Sleeper { wake_tick, priority, tid });
    }

    /// Pop the head if its deadline has passed.
    pub(super) fn pop_expired(&mut self, now: u64) -> Option<Tid> {
        if self.sleepers.first()?.wake_tick <= now {
            Some(self.sleepers.remove(0).tid)
        } else {
            None
        }
    }

    pub(super) fn len(&self) -> usize {
        self.sleepers.len()
    }
}
