/*
 * In-Kernel Self Tests
 *
 * The kernel's workload is its own test suite: scheduling, sleeping,
 * synchronization and donation scenarios built from real threads, driven
 * by the runner below and reported over the serial console.
 *
 * Individual checks never panic; they record a pass/fail so one broken
 * scenario does not hide the rest. The boot command line can narrow the
 * run to a single test with `run=<name>`.
 */

pub mod alarm;
pub mod mlfqs;
pub mod sync;

use crate::scheduler::{self, SchedulerMode};
use crate::sync::IntrCell;

static PASSED: IntrCell<usize> = IntrCell::new(0);
static FAILED: IntrCell<usize> = IntrCell::new(0);

/// Record one check.
pub(crate) fn check(ok: bool, what: &str) {
    if ok {
        crate::serial_println!("    ok: {}", what);
        PASSED.with(|n| *n += 1);
    } else {
        crate::serial_println!("    FAILED: {}", what);
        FAILED.with(|n| *n += 1);
    }
}

struct Test {
    name: &'static str,
    run: fn(),
    /// Restrict to one scheduler mode; `None` runs in both.
    mode: Option<SchedulerMode>,
}

const TESTS: &[Test] = &[
    Test { name: "alarm-ordering", run: alarm::ordering, mode: None },
    Test { name: "alarm-bounds", run: alarm::bounds, mode: None },
    Test { name: "sema-updown", run: sync::sema_updown, mode: None },
    Test { name: "sema-wake-order", run: sync::sema_wake_order, mode: Some(SchedulerMode::Priority) },
    Test { name: "lock-basics", run: sync::lock_basics, mode: None },
    Test { name: "priority-roundtrip", run: sync::priority_roundtrip, mode: Some(SchedulerMode::Priority) },
    Test { name: "priority-preemption", run: sync::priority_preemption, mode: Some(SchedulerMode::Priority) },
    Test { name: "cond-wake-order", run: sync::cond_wake_order, mode: Some(SchedulerMode::Priority) },
    Test { name: "cond-broadcast", run: sync::cond_broadcast, mode: Some(SchedulerMode::Priority) },
    Test { name: "donate-simple", run: donation::simple, mode: Some(SchedulerMode::Priority) },
    Test { name: "donate-multiple", run: donation::multiple, mode: Some(SchedulerMode::Priority) },
    Test { name: "donate-nested", run: donation::nested, mode: Some(SchedulerMode::Priority) },
    Test { name: "donate-chain-depth", run: donation::chain_depth, mode: Some(SchedulerMode::Priority) },
    Test { name: "fixed-point", run: mlfqs::fixed_point, mode: None },
    Test { name: "mlfqs-load-avg", run: mlfqs::load_avg, mode: Some(SchedulerMode::Mlfqs) },
    Test { name: "mlfqs-recent-cpu", run: mlfqs::recent_cpu, mode: Some(SchedulerMode::Mlfqs) },
    Test { name: "mlfqs-priority-drift", run: mlfqs::priority_drift, mode: Some(SchedulerMode::Mlfqs) },
    Test { name: "mlfqs-setters-inert", run: mlfqs::setters_inert, mode: Some(SchedulerMode::Mlfqs) },
];

/// Run the suite (or the single `run=<name>` selection).
pub fn run(cmdline: &str) {
    let mode = scheduler::mode();
    let selected = cmdline
        .split_whitespace()
        .find_map(|word| word.strip_prefix("run="));

    crate::serial_println!("== self-test suite ({:?} mode) ==", mode);

    let mut ran = 0usize;
    for test in TESTS {
        if let Some(name) = selected {
            if test.name != name {
                continue;
            }
        }
        if test.mode.is_some_and(|m| m != mode) {
            if selected.is_some() {
                crate::serial_println!("  [{}] skipped: needs {:?} mode", test.name, test.mode.unwrap());
            }
            continue;
        }
        crate::serial_println!("  [{}]", test.name);
        (test.run)();
        ran += 1;
    }

    if let Some(name) = selected
        && ran == 0
    {
        log::warn!("no runnable test named '{}'", name);
    }

    let passed = PASSED.with(|n| *n);
    let failed = FAILED.with(|n| *n);
    if failed == 0 {
        log::info!("self-test summary: {} checks passed", passed);
    } else {
        log::error!("self-test summary: {} passed, {} FAILED", passed, failed);
    }
}
