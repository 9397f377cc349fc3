/*
 * Condition Variable
 *
 * Mesa-style monitors over a caller-supplied lock: `signal` wakes a
 * waiter but is not atomic with the wake-up, so waiters must re-check
 * their predicate in a loop.
 *
 * Each waiter parks on its own zero-permit semaphore. That keeps the
 * handoff race-free without holding the lock across the block: if the
 * signal fires between our release and our down, the permit is simply
 * banked and the down returns immediately.
 */

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{IntrCell, Lock, Semaphore};
use crate::scheduler::{self, Tid};

struct Waiter {
    tid: Tid,
    sema: Arc<Semaphore>,
}

pub struct Condvar {
    /// Waiting threads, descending owner priority; re-sorted at signal
    /// because donations can change priorities while threads wait.
    waiters: IntrCell<Vec<Waiter>>,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: IntrCell::new(Vec::new()),
        }
    }

    /// Atomically release `lock` and wait for a signal, re-acquiring the
    /// lock before returning. The caller must hold `lock`, one lock per
    /// condition variable by convention.
    pub fn wait(&self, lock: &Lock) {
        assert!(!scheduler::in_intr_context(), "condvar wait in interrupt context");
        assert!(lock.held_by_current(), "condvar wait without holding the lock");

        let sema = Arc::new(Semaphore::new(0));
        let cur = scheduler::current_tid();
        let priority = scheduler::thread_priority(cur);
        self.waiters.with(|waiters| {
            let pos = waiters
                .iter()
                .position(|w| scheduler::thread_priority(w.tid) < priority)
                .unwrap_or(waiters.len());
            waiters.insert(
                pos,
                Waiter {
                    tid: cur,
                    sema: Arc::clone(&sema),
                },
            );
        });

        lock.release();
        sema.down();
        lock.acquire();
    }

    /// Wake the highest-priority waiter, if any.
    pub fn signal(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "condvar signal without holding the lock");
        if let Some(waiter) = self.pop_best() {
            waiter.sema.up();
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "condvar broadcast without holding the lock");
        while let Some(waiter) = self.pop_best() {
            waiter.sema.up();
        }
    }

    /// Remove the waiter whose owning thread currently ranks highest.
    fn pop_best(&self) -> Option<Waiter> {
        self.waiters.with(|waiters| {
            if waiters.is_empty() {
                return None;
            }
            // Stable insertion sort by live priority; no allocation.
            for i in 1..waiters.len() {
                let mut j = i;
                while j > 0
                    && scheduler::thread_priority(waiters[j - 1].tid)
                        < scheduler::thread_priority(waiters[j].tid)
                {
                    waiters.swap(j - 1, j);
                    j -= 1;
                }
            }
            Some(waiters.remove(0))
        })
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
