/*
 * Synchronization Primitives
 *
 * The blocking primitives of the kernel: counting semaphores, locks with
 * priority donation, and Mesa-style condition variables. All of them are
 * built on one mechanism, interrupt masking, which is the only mutual
 * exclusion the scheduler core uses on this single-CPU machine.
 */

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;

use core::cell::UnsafeCell;

use crate::arch::x86_64::interrupts::DisableInterrupts;

/// Shared mutable state gated by the interrupt flag.
///
/// `with` masks interrupts for the duration of the closure, which on a
/// uniprocessor makes the access exclusive. Callers must not nest `with`
/// calls on the same cell; the scheduler keeps its critical sections short
/// and flat, so the rule is easy to follow in practice.
pub struct IntrCell<T> {
    value: UnsafeCell<T>,
}

// Safety: single execution unit; all access happens with interrupts masked.
unsafe impl<T: Send> Sync for IntrCell<T> {}

impl<T> IntrCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access to the inner value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = DisableInterrupts::new();
        // Safety: interrupts are masked and `with` is never nested on the
        // same cell, so this is the only live borrow.
        f(unsafe { &mut *self.value.get() })
    }
}
