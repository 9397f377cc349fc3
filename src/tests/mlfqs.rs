/*
 * Fixed-Point and MLFQS Governor Tests
 *
 * The arithmetic checks run in either mode; the governor scenarios need
 * the kernel booted with `-mlfqs`. The behavioral checks use generous
 * bounds: exact tick phasing is not reproducible, drift direction is.
 */

use super::check;
use crate::devices::timer::{self, TIMER_FREQ};
use crate::scheduler::{self, PRI_DEFAULT, PRI_MAX, fixed::Fixed};
use crate::sync::{IntrCell, Semaphore};

/// Arithmetic laws of the 17.14 representation.
pub fn fixed_point() {
    check(Fixed::from_int(5).trunc() == 5, "int round-trips through the representation");
    check(Fixed::frac(1, 2).round() == 1, "0.5 rounds up");
    check(Fixed::frac(-1, 2).round() == -1, "-0.5 rounds away from zero");
    check(Fixed::frac(7, 4).trunc() == 1, "truncation drops the fraction");
    check((Fixed::frac(59, 60) * Fixed::from_int(60)).round() == 59, "fp multiply");
    check((Fixed::from_int(1) / Fixed::from_int(3)).mul_int(3).round() == 1, "fp divide");
    check(Fixed::from_int(7).div_int(2).round() == 4, "3.5 rounds to 4");
    check(Fixed::from_int(2).add_int(3).trunc() == 5, "mixed add");
    check(Fixed::from_int(2).sub_int(3).trunc() == -1, "mixed subtract");
    check(Fixed::from_int(100).mul_int(100).trunc() == 10_000, "headroom for load*100 reporting");
}

static STOP: IntrCell<bool> = IntrCell::new(false);
static DONE: Semaphore = Semaphore::new(0);

fn spinner(_aux: usize) {
    while !STOP.with(|s| *s) {
        core::hint::spin_loop();
    }
    DONE.up();
}

fn napper(_aux: usize) {
    while !STOP.with(|s| *s) {
        timer::sleep_ticks(2);
    }
    DONE.up();
}

/// With two compute-bound threads on the CPU for a second, the reported
/// load average (scaled by 100) moves off zero toward the ready count.
pub fn load_avg() {
    STOP.with(|s| *s = false);
    scheduler::spawn("load-spin-1", PRI_DEFAULT, spinner, 0).unwrap();
    scheduler::spawn("load-spin-2", PRI_DEFAULT, spinner, 0).unwrap();

    // Just over one decay period; main sleeps, so the spinners own the CPU.
    timer::sleep_ticks(i64::from(TIMER_FREQ) + 10);

    let load = scheduler::get_load_avg();
    // One period with ~2 ready threads contributes 100 * 2/60 ~= 3.
    check((1..=20).contains(&load), "load average reflects the ready threads");

    STOP.with(|s| *s = true);
    for _ in 0..2 {
        DONE.down();
    }
}

/// recent_cpu accumulates while a thread actually runs.
pub fn recent_cpu() {
    let before = scheduler::get_recent_cpu();
    let start = timer::now_ticks();
    while timer::elapsed_since(start) < 5 {
        core::hint::spin_loop();
    }
    check(scheduler::get_recent_cpu() > before, "recent_cpu grows under load");
}

/// A spinner's governed priority decays below a mostly-sleeping thread's.
pub fn priority_drift() {
    STOP.with(|s| *s = false);
    let spin = scheduler::spawn("drift-spin", PRI_DEFAULT, spinner, 0).unwrap();
    let nap = scheduler::spawn("drift-nap", PRI_DEFAULT, napper, 0).unwrap();

    timer::sleep_ticks(i64::from(TIMER_FREQ) * 3 / 2);

    let stats = scheduler::stats();
    let priority_of = |tid| {
        stats
            .iter()
            .find(|s| s.tid == tid)
            .map(|s| s.priority)
            .unwrap_or(PRI_MAX)
    };
    check(
        priority_of(spin) < priority_of(nap),
        "compute-bound thread sinks below the sleeper",
    );
    check(priority_of(spin) < PRI_MAX, "spinner no longer at the ceiling");

    STOP.with(|s| *s = true);
    for _ in 0..2 {
        DONE.down();
    }
}

/// Under the governor the explicit setter is inert, niceness feeds the
/// formula, and locks still work (without donation).
pub fn setters_inert() {
    scheduler::set_priority(scheduler::PRI_MIN);
    check(
        scheduler::get_priority() >= PRI_DEFAULT,
        "set_priority cannot drag a governed priority down",
    );

    let neutral = scheduler::get_priority();
    scheduler::set_niceness(20);
    check(scheduler::get_niceness() == 20, "niceness is read back");
    check(
        scheduler::get_priority() < neutral - 20,
        "maximum niceness costs 40 priority levels",
    );
    scheduler::set_niceness(0);

    let lock = crate::sync::Lock::new();
    lock.acquire();
    check(lock.held_by_current(), "locks still function under the governor");
    lock.release();
}
