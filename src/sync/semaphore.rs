/*
 * Counting Semaphore
 *
 * The base blocking primitive: a non-negative counter plus a waiter list
 * ordered by thread priority. Everything else in this module (locks,
 * condition variables) is built out of semaphores.
 *
 * The waiter list is ordered at insertion, but ordering at insertion is
 * not enough: a waiter's effective priority can rise through a donation
 * while it sleeps here. `up` therefore re-sorts by the *current*
 * priorities before waking the head.
 */

use alloc::vec::Vec;

use super::IntrCell;
use crate::arch::x86_64::interrupts::DisableInterrupts;
use crate::scheduler::{self, Tid};

struct SemaInner {
    value: u32,
    /// Blocked threads, descending effective priority.
    waiters: Vec<Tid>,
}

pub struct Semaphore {
    inner: IntrCell<SemaInner>,
}

/// Sort a waiter list by current effective priority, descending.
///
/// In-place insertion sort: stable (equal priorities stay FIFO) and
/// allocation-free, because `up` may run from the tick handler.
pub(super) fn sort_by_live_priority(waiters: &mut [Tid]) {
    for i in 1..waiters.len() {
        let mut j = i;
        while j > 0
            && scheduler::thread_priority(waiters[j - 1])
                < scheduler::thread_priority(waiters[j])
        {
            waiters.swap(j - 1, j);
            j -= 1;
        }
    }
}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            inner: IntrCell::new(SemaInner {
                value,
                waiters: Vec::new(),
            }),
        }
    }

    /// The "P" operation: wait until a permit is available and take it.
    ///
    /// Blocks, so it must not be called from an interrupt handler. The
    /// loop re-checks after every wake: a freshly woken waiter can lose
    /// the permit to a thread that slipped in between `up` and its
    /// dispatch, in which case it just blocks again.
    pub fn down(&self) {
        assert!(!scheduler::in_intr_context(), "sema down in interrupt context");
        let _level = DisableInterrupts::new();
        loop {
            let acquired = self.inner.with(|sema| {
                if sema.value > 0 {
                    sema.value -= 1;
                    true
                } else {
                    let cur = scheduler::current_tid();
                    let priority = scheduler::thread_priority(cur);
                    let pos = sema
                        .waiters
                        .iter()
                        .position(|&t| scheduler::thread_priority(t) < priority)
                        .unwrap_or(sema.waiters.len());
                    sema.waiters.insert(pos, cur);
                    false
                }
            });
            if acquired {
                break;
            }
            scheduler::block_current();
        }
    }

    /// Take a permit if one is available, without blocking. Safe from
    /// interrupt context.
    pub fn try_down(&self) -> bool {
        self.inner.with(|sema| {
            if sema.value > 0 {
                sema.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// The "V" operation: release a permit and wake the best waiter.
    ///
    /// Safe from interrupt context. If the woken thread outranks the
    /// running one, preemption is requested (immediately in thread
    /// context, on interrupt return otherwise).
    pub fn up(&self) {
        let _level = DisableInterrupts::new();
        let woken = self.inner.with(|sema| {
            let woken = if sema.waiters.is_empty() {
                None
            } else {
                sort_by_live_priority(&mut sema.waiters);
                Some(sema.waiters.remove(0))
            };
            sema.value += 1;
            woken
        });
        if let Some(tid) = woken {
            scheduler::unblock(tid);
            scheduler::check_preempt();
        }
    }

    /// Current permit count. Diagnostic only; stale the moment it is read.
    pub fn value(&self) -> u32 {
        self.inner.with(|sema| sema.value)
    }
}
