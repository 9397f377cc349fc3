/*
 * MLFQS Governor
 *
 * The multilevel-feedback-queue mode derives every thread's priority from
 * its recent CPU usage and niceness instead of taking it from the thread.
 * Three cadences, all driven by the tick handler:
 *
 *   every tick     recent_cpu of the running (non-idle) thread += 1
 *   every 4 ticks  priority = PRI_MAX - recent_cpu/4 - 2*nice, for all
 *   every second   load_avg decays toward the ready-thread count and
 *                  every recent_cpu decays by 2*load_avg/(2*load_avg + 1)
 *
 * All arithmetic is 17.14 fixed point. While this governor is active the
 * explicit priority setters and the donation machinery are inert.
 */

use super::fixed::Fixed;
use super::thread::Thread;
use super::{PRI_MAX, PRI_MIN, Scheduler};

/// The governed priority of one thread, clamped to the legal range.
pub(super) fn priority_for(thread: &Thread) -> i32 {
    let fp = Fixed::from_int(PRI_MAX)
        - thread.recent_cpu.div_int(4)
        - Fixed::from_int(thread.nice * 2);
    fp.round().clamp(PRI_MIN, PRI_MAX)
}

/// Per-tick accounting: charge the tick to the running thread.
pub(super) fn tick(sched: &mut Scheduler, running: super::thread::Tid) {
    if sched.idle != Some(running)
        && let Some(thread) = sched.get_mut(running)
    {
        thread.recent_cpu = thread.recent_cpu.add_int(1);
    }
}

/// Once-per-second pass: refresh the load average, then decay every
/// thread's recent CPU toward it.
pub(super) fn update_second(sched: &mut Scheduler, running: super::thread::Tid) {
    let running_counts = sched.idle != Some(running);
    let ready_threads = (sched.ready.len() + usize::from(running_counts)) as i32;

    sched.load_avg =
        Fixed::frac(59, 60) * sched.load_avg + Fixed::frac(1, 60).mul_int(ready_threads);

    let twice_load = sched.load_avg.mul_int(2);
    let coefficient = twice_load / twice_load.add_int(1);
    let idle = sched.idle;
    for thread in sched.threads.iter_mut() {
        if idle == Some(thread.tid) {
            continue;
        }
        thread.recent_cpu = (coefficient * thread.recent_cpu).add_int(thread.nice);
    }
}

/// Every-fourth-tick pass: recompute every priority and restore the ready
/// queue's ordering.
pub(super) fn recompute_priorities(sched: &mut Scheduler) {
    let idle = sched.idle;
    for thread in sched.threads.iter_mut() {
        if idle == Some(thread.tid) {
            continue;
        }
        let p = priority_for(thread);
        thread.priority = p;
        thread.base_priority = p;
    }
    sched.resort_ready();
}
