/*
 * Scheduler and Synchronization Tests
 *
 * Wake ordering, preemption on spawn, priority round trips, and the
 * monitor primitives. All of these run in priority mode except the
 * mode-neutral semaphore and lock basics.
 */

use super::check;
use crate::devices::timer;
use crate::scheduler::{self, PRI_DEFAULT};
use crate::sync::{Condvar, IntrCell, Lock, Semaphore};

static DONE: Semaphore = Semaphore::new(0);
static ORDER: IntrCell<heapless::Vec<usize, 8>> = IntrCell::new(heapless::Vec::new());

/// A released permit is consumed by exactly one down.
pub fn sema_updown() {
    let sema = Semaphore::new(0);
    sema.up();
    check(sema.try_down(), "up then try_down takes the permit");
    check(!sema.try_down(), "the permit is gone after the pair");
    check(sema.value() == 0, "counter is back to zero");
}

fn sema_order_waiter(id: usize) {
    SEMA.down();
    ORDER.with(|o| o.push(id).unwrap());
    DONE.up();
}

static SEMA: Semaphore = Semaphore::new(0);

/// Waiters leave a semaphore in priority order regardless of arrival
/// order.
pub fn sema_wake_order() {
    ORDER.with(|o| o.clear());

    // All three outrank main, so each runs to its down() immediately.
    scheduler::spawn("sema-w35", 35, sema_order_waiter, 35).unwrap();
    scheduler::spawn("sema-w33", 33, sema_order_waiter, 33).unwrap();
    scheduler::spawn("sema-w34", 34, sema_order_waiter, 34).unwrap();

    for _ in 0..3 {
        SEMA.up();
    }
    for _ in 0..3 {
        DONE.down();
    }

    let order = ORDER.with(|o| o.clone());
    check(order == [35, 34, 33], "semaphore wakes by priority, not arrival");
}

/// Uncontended lock operations and the owner bookkeeping.
pub fn lock_basics() {
    let lock = Lock::new();
    check(!lock.held_by_current(), "fresh lock is unowned");

    // The governor may legitimately move priorities between reads, so the
    // priority round-trip is only checked in priority mode.
    let fixed_priorities = scheduler::mode() == scheduler::SchedulerMode::Priority;
    let before = scheduler::get_priority();

    lock.acquire();
    check(lock.held_by_current(), "owner sees held_by_current");
    if fixed_priorities {
        check(scheduler::get_priority() == before, "uncontended acquire leaves priority alone");
    }
    lock.release();
    check(!lock.held_by_current(), "release clears ownership");

    check(lock.try_acquire(), "try_acquire takes a free lock");
    lock.release();
    if fixed_priorities {
        check(scheduler::get_priority() == before, "acquire/release round-trips priority");
    }
}

/// set_priority is read back by get_priority when no donation is active.
pub fn priority_roundtrip() {
    let original = scheduler::get_priority();

    scheduler::set_priority(40);
    check(scheduler::get_priority() == 40, "set_priority(40) is read back");

    scheduler::set_priority(original);
    check(scheduler::get_priority() == original, "priority restored");
}

static HIGH_RAN: IntrCell<bool> = IntrCell::new(false);

fn high_thread(_aux: usize) {
    HIGH_RAN.with(|b| *b = true);
}

/// Spawning a higher-priority thread preempts the creator: the child
/// runs to completion before spawn returns.
pub fn priority_preemption() {
    HIGH_RAN.with(|b| *b = false);
    scheduler::spawn("preempt-hi", PRI_DEFAULT + 3, high_thread, 0).unwrap();
    check(HIGH_RAN.with(|b| *b), "higher-priority child finished before spawn returned");
}

static MONITOR: Lock = Lock::new();
static COND: Condvar = Condvar::new();

fn cond_waiter(id: usize) {
    MONITOR.acquire();
    COND.wait(&MONITOR);
    ORDER.with(|o| o.push(id).unwrap());
    MONITOR.release();
    DONE.up();
}

/// Signals wake condition-variable waiters in priority order.
pub fn cond_wake_order() {
    ORDER.with(|o| o.clear());

    scheduler::spawn("cond-30", 30, cond_waiter, 30).unwrap();
    scheduler::spawn("cond-33", 33, cond_waiter, 33).unwrap();
    scheduler::spawn("cond-31", 31, cond_waiter, 31).unwrap();

    // The 30 and 31 waiters only reach the wait once main sleeps.
    timer::sleep_ticks(5);

    for _ in 0..3 {
        MONITOR.acquire();
        COND.signal(&MONITOR);
        MONITOR.release();
    }
    for _ in 0..3 {
        DONE.down();
    }

    let order = ORDER.with(|o| o.clone());
    check(order == [33, 31, 30], "signals wake waiters best-priority first");
}

/// Broadcast wakes everyone, still in priority order.
pub fn cond_broadcast() {
    ORDER.with(|o| o.clear());

    scheduler::spawn("bcast-32", 32, cond_waiter, 32).unwrap();
    scheduler::spawn("bcast-34", 34, cond_waiter, 34).unwrap();
    scheduler::spawn("bcast-33", 33, cond_waiter, 33).unwrap();

    MONITOR.acquire();
    COND.broadcast(&MONITOR);
    MONITOR.release();

    for _ in 0..3 {
        DONE.down();
    }

    let order = ORDER.with(|o| o.clone());
    check(order == [34, 33, 32], "broadcast drains the monitor best-priority first");
}
