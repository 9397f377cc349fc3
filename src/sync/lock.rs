/*
 * Lock with Priority Donation
 *
 * A lock is a one-permit semaphore plus an owner. Ownership is what
 * enables donation: when a thread blocks on a lock held by someone of
 * lower effective priority, it lends the holder its own priority so the
 * holder cannot be starved by middle-priority threads. Donations chain
 * through `waiting_on_lock` edges up to a depth bound of 8 and are
 * stripped again at release.
 *
 * Contract violations are fatal by design: acquiring a lock already held
 * by the caller, releasing someone else's lock, or acquiring from an
 * interrupt handler all panic.
 */

use super::{IntrCell, Semaphore};
use crate::arch::x86_64::interrupts::DisableInterrupts;
use crate::scheduler::{self, Tid};

pub struct Lock {
    /// Present exactly while the embedded semaphore's counter is zero.
    holder: IntrCell<Option<Tid>>,
    sema: Semaphore,
}

impl Lock {
    pub const fn new() -> Self {
        Self {
            holder: IntrCell::new(None),
            sema: Semaphore::new(1),
        }
    }

    /// Acquire the lock, donating priority to the holder while blocked.
    pub fn acquire(&self) {
        assert!(!scheduler::in_intr_context(), "lock acquire in interrupt context");
        assert!(!self.held_by_current(), "lock already held by this thread");

        let _level = DisableInterrupts::new();

        if scheduler::donation_enabled()
            && let Some(holder) = self.holder.with(|h| *h)
        {
            // Record the wait edge before blocking so donations from
            // threads that later queue behind us can flow through.
            scheduler::donate_to(holder, self as *const Lock);
        }

        self.sema.down();

        if scheduler::donation_enabled() {
            scheduler::clear_waiting_on_lock();
        }
        self.holder.with(|h| {
            debug_assert!(h.is_none());
            *h = Some(scheduler::current_tid());
        });
    }

    /// Take the lock only if it is free. No donation, no blocking; safe
    /// from interrupt context.
    pub fn try_acquire(&self) -> bool {
        assert!(!self.held_by_current(), "lock already held by this thread");
        let _level = DisableInterrupts::new();
        if self.sema.try_down() {
            self.holder.with(|h| *h = Some(scheduler::current_tid()));
            true
        } else {
            false
        }
    }

    /// Release the lock, dropping any donations that were tied to it.
    pub fn release(&self) {
        assert!(self.held_by_current(), "lock released by a thread that does not hold it");

        let _level = DisableInterrupts::new();

        if scheduler::donation_enabled() {
            scheduler::strip_donations_for(self as *const Lock);
        }
        self.holder.with(|h| *h = None);
        self.sema.up();
    }

    /// Whether the running thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        self.holder.with(|h| *h == Some(scheduler::current_tid()))
    }

    /// Current holder, read under the interrupt mask. Used by the
    /// donation walk to follow the chain.
    pub(crate) fn holder_tid(&self) -> Option<Tid> {
        self.holder.with(|h| *h)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
