/*
 * System Timer
 *
 * The PIT tick is the kernel's clock: a monotonically increasing tick
 * counter at TIMER_FREQ Hz drives sleeping, time slicing and the MLFQS
 * cadences. `sleep_ticks` parks the caller on the scheduler's sleep
 * queue; sub-tick delays fall back to a busy-wait calibrated at boot.
 */

use core::hint;

use crate::arch::x86_64::interrupts;
use crate::scheduler;
use crate::sync::IntrCell;

/// Timer interrupts per second. The PIT divisor limits this to
/// [19, 1000]; 100 gives the canonical 10 ms tick.
pub const TIMER_FREQ: u32 = 100;

/// Ticks since boot.
static TICKS: IntrCell<u64> = IntrCell::new(0);

/// Busy-wait iterations per tick, measured by `calibrate`.
static LOOPS_PER_TICK: IntrCell<u64> = IntrCell::new(0);

/// Body of the IRQ0 handler: advance the clock, then let the scheduler
/// account the tick, wake sleepers and check the time slice.
pub(crate) fn interrupt_tick() {
    let now = TICKS.with(|t| {
        *t += 1;
        *t
    });
    scheduler::note_tick(now);
}

/// Ticks since boot. The read masks interrupts so it cannot tear against
/// the tick handler.
pub fn now_ticks() -> u64 {
    TICKS.with(|t| *t)
}

/// Ticks elapsed since `then`, which should be a `now_ticks` result.
pub fn elapsed_since(then: u64) -> u64 {
    now_ticks() - then
}

/// Suspend the calling thread for at least `ticks` timer ticks.
///
/// Zero and negative requests return immediately. The wake-up makes the
/// thread ready, not running: it resumes under the normal priority rules,
/// so the sleep is a lower bound.
pub fn sleep_ticks(ticks: i64) {
    if ticks <= 0 {
        return;
    }
    assert!(interrupts::are_enabled(), "sleep_ticks requires interrupts enabled");

    let start = now_ticks();
    if !scheduler::is_enabled() {
        // Too early to block; wait out the clock directly.
        while elapsed_since(start) < ticks as u64 {
            x86_64::instructions::hlt();
        }
        return;
    }

    scheduler::sleep_until(start + ticks as u64);
}

/// Sleep for approximately `ms` milliseconds.
pub fn msleep(ms: i64) {
    real_time_sleep(ms, 1000);
}

/// Sleep for approximately `us` microseconds.
pub fn usleep(us: i64) {
    real_time_sleep(us, 1_000_000);
}

/// Log the tick count since boot.
pub fn print_stats() {
    log::info!("Timer: {} ticks", now_ticks());
}

/// Sleep for `num`/`denom` seconds: through the sleep queue when the
/// interval is at least one tick, otherwise by busy-waiting, since the
/// tick granularity cannot express it.
fn real_time_sleep(num: i64, denom: i64) {
    let ticks = num * i64::from(TIMER_FREQ) / denom;

    assert!(interrupts::are_enabled());
    if ticks > 0 {
        sleep_ticks(ticks);
    } else if num > 0 {
        let loops = LOOPS_PER_TICK.with(|l| *l);
        debug_assert!(denom % 1000 == 0);
        busy_wait(loops * num as u64 / 1000 * u64::from(TIMER_FREQ) / (denom as u64 / 1000));
    }
}

/// Measure how many busy-wait iterations fit in one tick.
///
/// Doubles a loop count until it overshoots a tick, then refines the next
/// ten bits downward, giving loops-per-tick to about one part in a
/// thousand. Must run with interrupts enabled and the tick source live.
pub fn calibrate() {
    assert!(interrupts::are_enabled(), "calibration needs a running tick source");

    let mut loops_per_tick: u64 = 1 << 10;
    while !too_many_loops(loops_per_tick << 1) {
        loops_per_tick <<= 1;
        assert!(loops_per_tick != 0, "calibration overflow");
    }

    let high_bit = loops_per_tick;
    let mut test_bit = high_bit >> 1;
    while test_bit != high_bit >> 10 {
        if !too_many_loops(high_bit | test_bit) {
            loops_per_tick |= test_bit;
        }
        test_bit >>= 1;
    }

    LOOPS_PER_TICK.with(|l| *l = loops_per_tick);
    log::info!(
        "Timer calibrated: {} loops/tick ({} loops/s)",
        loops_per_tick,
        loops_per_tick * u64::from(TIMER_FREQ)
    );
}

/// Whether `loops` iterations span more than one tick.
fn too_many_loops(loops: u64) -> bool {
    // Align to a tick boundary so the measurement window is a full tick.
    let start = now_ticks();
    while now_ticks() == start {
        hint::spin_loop();
    }

    let start = now_ticks();
    busy_wait(loops);
    now_ticks() != start
}

/// Spin for `loops` iterations.
///
/// Marked inline(never) so code layout does not change the per-iteration
/// cost between calibration and later use.
#[inline(never)]
fn busy_wait(mut loops: u64) {
    while loops > 0 {
        hint::spin_loop();
        loops -= 1;
    }
}
