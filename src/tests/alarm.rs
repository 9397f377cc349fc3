/*
 * Alarm Tests
 *
 * Sleeping threads must wake in deadline order, never early, and zero or
 * negative requests must return at once.
 */

use super::check;
use crate::devices::timer;
use crate::scheduler::{self, PRI_DEFAULT};
use crate::sync::{IntrCell, Semaphore};

static DONE: Semaphore = Semaphore::new(0);
static START_TICK: IntrCell<u64> = IntrCell::new(0);
static WAKE_LOG: IntrCell<heapless::Vec<(usize, u64), 8>> = IntrCell::new(heapless::Vec::new());

/// aux packs the sleeper id in the high bits and the tick count below.
fn sleeper(aux: usize) {
    let id = aux >> 8;
    let ticks = (aux & 0xff) as i64;

    timer::sleep_ticks(ticks);

    let start = START_TICK.with(|t| *t);
    let elapsed = timer::elapsed_since(start);
    WAKE_LOG.with(|log| log.push((id, elapsed)).unwrap());
    DONE.up();
}

/// Three equal-priority sleepers with staggered deadlines wake in
/// deadline order, each no earlier than its request.
pub fn ordering() {
    WAKE_LOG.with(|log| log.clear());
    START_TICK.with(|t| *t = timer::now_ticks());

    scheduler::spawn("alarm-a", PRI_DEFAULT, sleeper, (0 << 8) | 30).unwrap();
    scheduler::spawn("alarm-b", PRI_DEFAULT, sleeper, (1 << 8) | 10).unwrap();
    scheduler::spawn("alarm-c", PRI_DEFAULT, sleeper, (2 << 8) | 20).unwrap();

    for _ in 0..3 {
        DONE.down();
    }

    let log = WAKE_LOG.with(|l| l.clone());
    check(log.len() == 3, "all three sleepers woke");

    let order: heapless::Vec<usize, 8> = log.iter().map(|&(id, _)| id).collect();
    check(order == [1, 2, 0], "wake order follows the deadlines (b, c, a)");

    let requested = [30u64, 10, 20];
    let no_early_wake = log.iter().all(|&(id, elapsed)| elapsed >= requested[id]);
    check(no_early_wake, "no sleeper woke before its deadline");
}

/// Boundary behavior: zero and negative sleeps return immediately; a
/// one-tick sleep waits at least one tick.
pub fn bounds() {
    let start = timer::now_ticks();
    timer::sleep_ticks(0);
    timer::sleep_ticks(-5);
    check(timer::elapsed_since(start) <= 1, "zero and negative sleeps return immediately");

    let start = timer::now_ticks();
    timer::sleep_ticks(1);
    check(timer::elapsed_since(start) >= 1, "sleep_ticks(1) waits at least one tick");
}
