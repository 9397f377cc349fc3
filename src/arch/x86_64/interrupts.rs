/*
 * Interrupt Flag Control
 *
 * On a single-CPU kernel the interrupt-enable flag is the only mutual
 * exclusion mechanism the scheduler core uses: every read-modify-write of
 * shared scheduler state happens with interrupts masked. This module wraps
 * the x86_64 instructions and provides the save/restore discipline that
 * makes masked sections nestable.
 */

use x86_64::instructions::interrupts;

/// Enable interrupts globally.
///
/// Must only be called once the IDT is loaded and the PIC is remapped.
pub fn enable() {
    interrupts::enable();
}

/// Disable interrupts globally.
pub fn disable() {
    interrupts::disable();
}

/// Whether interrupts are currently enabled.
pub fn are_enabled() -> bool {
    interrupts::are_enabled()
}

/// Run a closure with interrupts masked, restoring the previous state after.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    interrupts::without_interrupts(f)
}

/// RAII guard that masks interrupts for its lifetime.
///
/// The prior interrupt level is captured at construction and restored on
/// drop, so guards nest: an inner guard inside an already-masked section
/// leaves interrupts off when it goes out of scope.
pub struct DisableInterrupts {
    were_enabled: bool,
}

impl DisableInterrupts {
    pub fn new() -> Self {
        let were_enabled = are_enabled();
        if were_enabled {
            disable();
        }
        Self { were_enabled }
    }
}

impl Drop for DisableInterrupts {
    fn drop(&mut self) {
        if self.were_enabled {
            enable();
        }
    }
}
