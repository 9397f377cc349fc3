/*
 * Preemptive Priority Scheduler
 *
 * The dispatcher always runs the highest-priority ready thread; ties are
 * round-robin. Preemption is driven by the PIT tick: when the running
 * thread's time slice is used up, the tick handler requests a yield that
 * is honored on the way out of the interrupt. Synchronization primitives
 * feed blocked and woken threads through `block_current`/`unblock`, and
 * the optional MLFQS governor (selected on the boot command line)
 * replaces explicit priorities with derived ones.
 *
 * Every piece of state in this module is guarded by interrupt masking and
 * nothing else: on a single CPU, a masked section is exclusive by
 * construction, and a spin lock here would only add a deadlock risk for
 * the tick handler.
 *
 * Thread records live in one table that owns them (`threads`); the ready
 * queue, sleep queue and destruction-request list refer to them by tid.
 * A thread is in at most one of those at any time. Destruction is
 * deferred: an exiting thread cannot free the stack it is running on, so
 * it parks itself on the destruction-request list and the dispatcher
 * reaps it from the incoming thread's stack after the switch.
 */

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

mod context;
pub mod fixed;
mod mlfqs;
mod sleep;
pub mod thread;

pub use thread::{MAX_THREADS, STACK_SIZE, SpawnError, ThreadState, Tid};
pub(crate) use thread::with_current;

use crate::arch::x86_64::interrupts::{self, DisableInterrupts};
use crate::sync::{IntrCell, Lock};
use fixed::Fixed;
use thread::{Thread, ThreadStack};

/// Lowest priority (the idle thread).
pub const PRI_MIN: i32 = 0;
/// Default priority for new threads.
pub const PRI_DEFAULT: i32 = 31;
/// Highest priority.
pub const PRI_MAX: i32 = 63;

/// Ticks a thread may run before the tick handler requests a yield.
pub const TIME_SLICE: u32 = 4;

/// Maximum hops of the priority donation walk. Bounds the work done under
/// a masked section and terminates any cycle a broken lock discipline
/// could build.
pub const DONATION_DEPTH_MAX: usize = 8;

pub const NICE_MIN: i32 = -20;
pub const NICE_DEFAULT: i32 = 0;
pub const NICE_MAX: i32 = 20;

/// Scheduling mode, fixed at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Strict priorities with donation (the default).
    Priority,
    /// Multilevel feedback queue: priorities derived from recent CPU and
    /// niceness; setters and donation are inert.
    Mlfqs,
}

/// All scheduler state. One instance, gated by interrupt masking.
pub struct Scheduler {
    mode: SchedulerMode,
    enabled: bool,
    /// Owns every live thread record, including idle and the boot thread.
    threads: Vec<Box<Thread>>,
    /// Runnable threads, descending priority, FIFO within a priority.
    ready: Vec<Tid>,
    sleepers: sleep::SleepQueue,
    /// Exited threads awaiting the post-switch reap.
    reap_requests: Vec<Tid>,
    idle: Option<Tid>,
    /// Ticks the current thread has held the CPU in this slice.
    slice_ticks: u32,
    /// Set by the tick handler; honored on return from interrupt.
    yield_requested: bool,
    /// External interrupt nesting depth.
    intr_depth: u32,
    idle_ticks: u64,
    kernel_ticks: u64,
    /// MLFQS system load average.
    load_avg: Fixed,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            mode: SchedulerMode::Priority,
            enabled: false,
            threads: Vec::new(),
            ready: Vec::new(),
            sleepers: sleep::SleepQueue::new(),
            reap_requests: Vec::new(),
            idle: None,
            slice_ticks: 0,
            yield_requested: false,
            intr_depth: 0,
            idle_ticks: 0,
            kernel_ticks: 0,
            load_avg: Fixed::ZERO,
        }
    }

    fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.iter().find(|t| t.tid == tid).map(|b| &**b)
    }

    fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.tid == tid).map(|b| &mut **b)
    }

    fn priority_of(&self, tid: Tid) -> i32 {
        self.get(tid).map_or(PRI_MIN, |t| t.priority)
    }

    /// Insert a runnable thread behind every thread of equal or higher
    /// priority. This insertion rule is what makes equal-priority
    /// scheduling round-robin.
    fn ready_insert(&mut self, tid: Tid) {
        debug_assert!(!self.ready.contains(&tid));
        let priority = self.priority_of(tid);
        let pos = self
            .ready
            .iter()
            .position(|&t| self.priority_of(t) < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, tid);
    }

    /// Re-place a ready thread whose priority changed.
    fn requeue(&mut self, tid: Tid) {
        if let Some(pos) = self.ready.iter().position(|&t| t == tid) {
            self.ready.remove(pos);
            self.ready_insert(tid);
        }
    }

    /// Restore descending-priority order after a bulk priority change.
    ///
    /// Stable in-place insertion sort: keeps round-robin order within a
    /// priority and allocates nothing, because this runs from the tick
    /// handler.
    fn resort_ready(&mut self) {
        for i in 1..self.ready.len() {
            let mut j = i;
            while j > 0 && self.priority_of(self.ready[j - 1]) < self.priority_of(self.ready[j]) {
                self.ready.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    /// Recompute a thread's effective priority from its base and donors.
    fn refresh_priority(&mut self, tid: Tid) {
        let thread = self.get(tid).expect("refresh_priority: no such thread");
        let base = thread.base_priority;
        let donated = thread.donors.iter().map(|&d| self.priority_of(d)).max();
        let effective = donated.map_or(base, |d| base.max(d));

        if self.priority_of(tid) != effective {
            self.get_mut(tid).unwrap().priority = effective;
            if self.get(tid).unwrap().state == ThreadState::Ready {
                self.requeue(tid);
            }
        }
    }

    /// Highest-priority ready thread, or idle when nothing is runnable.
    fn pick_next(&mut self) -> Tid {
        if self.ready.is_empty() {
            self.idle.expect("nothing runnable and no idle thread")
        } else {
            self.ready.remove(0)
        }
    }

    /// Move every sleeper whose deadline has passed to the ready queue.
    fn wake_sleepers(&mut self, now: u64) {
        while let Some(tid) = self.sleepers.pop_expired(now) {
            let thread = self.get_mut(tid).expect("sleeper vanished");
            debug_assert_eq!(thread.state, ThreadState::Blocked);
            thread.wake_tick = None;
            thread.state = ThreadState::Ready;
            self.ready_insert(tid);
        }
    }

    /// Free every thread on the destruction-request list. Only called
    /// after a switch, from the incoming thread's stack.
    fn reap_dying(&mut self) {
        while let Some(tid) = self.reap_requests.pop() {
            if let Some(pos) = self.threads.iter().position(|t| t.tid == tid) {
                let thread = self.threads.swap_remove(pos);
                debug_assert_eq!(thread.state, ThreadState::Dying);
                drop(thread);
            }
        }
    }
}

static SCHED: IntrCell<Scheduler> = IntrCell::new(Scheduler::new());

/// Guards the tid counter. Deliberately a kernel lock rather than a masked
/// section: tid allocation takes no other locks, so this cannot deadlock,
/// and it keeps lock traffic on a boot-time path where tests can see it.
static TID_LOCK: Lock = Lock::new();
static NEXT_TID: IntrCell<usize> = IntrCell::new(0);

fn allocate_tid() -> Tid {
    TID_LOCK.acquire();
    let tid = NEXT_TID.with(|next| {
        let t = *next;
        *next += 1;
        Tid(t)
    });
    TID_LOCK.release();
    tid
}

/// Set up the scheduler and turn the booting context into the first
/// thread.
///
/// # Safety
///
/// `boot_stack` must be the `STACK_SIZE`-aligned stack the caller is
/// currently running on. Must be called exactly once, before interrupts
/// are enabled.
pub unsafe fn init(mode: SchedulerMode, boot_stack: *mut u8) {
    debug_assert_eq!(boot_stack as usize % STACK_SIZE, 0);

    SCHED.with(|s| {
        s.mode = mode;
        // Reserve up front: the tick handler inserts into these with the
        // heap potentially mid-operation elsewhere, so they must never
        // grow from interrupt context.
        s.threads.reserve(MAX_THREADS);
        s.ready.reserve(MAX_THREADS);
        s.reap_requests.reserve(MAX_THREADS);
        s.sleepers.reserve(MAX_THREADS);
    });

    let main = unsafe {
        Thread::adopt_boot_stack(Tid(0), "main", PRI_DEFAULT, boot_stack.cast::<ThreadStack>())
    };
    SCHED.with(|s| s.threads.push(main));

    // The boot stack header is live, so lookups (and with them the tid
    // lock) work from here on.
    let tid = allocate_tid();
    debug_assert_eq!(tid, Tid(0));

    log::info!("Scheduler initialized in {:?} mode", mode);
}

/// Spawn the idle thread and enable preemptive scheduling.
pub fn start() {
    let tid = allocate_tid();
    let mut idle = Thread::new(tid, "idle", PRI_MIN);
    context::prepare(&mut idle, idle_main, 0);
    // The idle thread is never on the ready queue; the dispatcher falls
    // back to it when the queue is empty, so it starts out Blocked.
    idle.state = ThreadState::Blocked;

    SCHED.with(|s| {
        s.threads.push(idle);
        s.idle = Some(tid);
        s.enabled = true;
    });
    log::info!("Scheduler enabled, preemption active");
}

pub fn is_enabled() -> bool {
    SCHED.with(|s| s.enabled)
}

pub fn mode() -> SchedulerMode {
    SCHED.with(|s| s.mode)
}

/// The body of the idle thread: park until the dispatcher has nothing
/// else, then halt until an interrupt delivers more work.
fn idle_main(_aux: usize) {
    loop {
        interrupts::disable();
        block_current();
        // Back from the dispatcher with nothing ready. Atomically
        // re-enable interrupts and halt until the next one.
        x86_64::instructions::interrupts::enable_and_hlt();
    }
}

/// Create a thread and make it runnable.
///
/// The entry function runs with interrupts enabled and receives `aux`;
/// if it returns, the thread exits. When the new thread outranks the
/// caller, the caller yields before returning.
pub fn spawn(name: &str, priority: i32, entry: fn(usize), aux: usize) -> Result<Tid, SpawnError> {
    assert!((PRI_MIN..=PRI_MAX).contains(&priority), "priority out of range");

    let tid = allocate_tid();
    let mut new_thread = Thread::new(tid, name, priority);
    context::prepare(&mut new_thread, entry, aux);

    let _guard = DisableInterrupts::new();
    SCHED.with(move |s| {
        if s.threads.len() >= MAX_THREADS {
            return Err(SpawnError::TooManyThreads);
        }
        if s.mode == SchedulerMode::Mlfqs {
            // Every thread starts at the default niceness and recent CPU;
            // the governed priority overrides the requested one.
            new_thread.nice = NICE_DEFAULT;
            new_thread.recent_cpu = Fixed::ZERO;
            let p = mlfqs::priority_for(&new_thread);
            new_thread.priority = p;
            new_thread.base_priority = p;
        }
        s.threads.push(new_thread);
        s.ready_insert(tid);
        Ok(())
    })?;

    log::debug!("spawned {} '{}'", tid, name);
    check_preempt();
    Ok(tid)
}

/// Mark the running thread blocked and dispatch.
///
/// Interrupts must already be off; the caller re-enables them (usually by
/// dropping its guard) once this returns after `unblock`.
pub fn block_current() {
    assert!(!interrupts::are_enabled(), "block requires interrupts off");
    let cur = current_tid();
    SCHED.with(|s| {
        assert_eq!(s.intr_depth, 0, "block in interrupt context");
        let thread = s.get_mut(cur).unwrap();
        assert_eq!(thread.state, ThreadState::Running, "only the running thread can block");
        thread.state = ThreadState::Blocked;
    });
    schedule();
}

/// Make a blocked thread runnable.
///
/// Legal from interrupt context. Does not preempt the running thread by
/// itself; preemption happens at the synchronization boundaries or on the
/// next slice expiry.
pub fn unblock(tid: Tid) {
    let _guard = DisableInterrupts::new();
    SCHED.with(|s| {
        let thread = s.get_mut(tid).expect("unblock: no such thread");
        assert_eq!(thread.state, ThreadState::Blocked, "unblock of a non-blocked thread");
        thread.state = ThreadState::Ready;
        s.ready_insert(tid);
    });
}

/// Give up the CPU, staying runnable.
pub fn yield_now() {
    let _guard = DisableInterrupts::new();
    let cur = current_tid();
    let proceed = SCHED.with(|s| {
        if !s.enabled {
            return false;
        }
        assert_eq!(s.intr_depth, 0, "yield from interrupt context");
        let idle = s.idle;
        let thread = s.get_mut(cur).unwrap();
        debug_assert_eq!(thread.state, ThreadState::Running);
        thread.state = ThreadState::Ready;
        if idle != Some(cur) {
            s.ready_insert(cur);
        }
        true
    });
    if proceed {
        schedule();
    }
}

/// Terminate the running thread. The stack cannot be freed from under our
/// feet, so the record is parked on the destruction-request list and the
/// dispatcher reaps it after the switch.
pub fn exit() -> ! {
    log::debug!("{} ('{}') exiting", current_tid(), thread_name());
    interrupts::disable();
    let cur = current_tid();
    SCHED.with(|s| {
        assert_eq!(s.intr_depth, 0, "exit from interrupt context");
        assert_ne!(s.idle, Some(cur), "idle thread cannot exit");
        s.get_mut(cur).unwrap().state = ThreadState::Dying;
        s.reap_requests.push(cur);
    });
    schedule();
    unreachable!("dispatcher returned to a dying thread");
}

/// First Rust code of every spawned thread: run the entry function, then
/// exit on its behalf if it returns.
pub(super) extern "C" fn thread_start(entry: fn(usize), aux: usize) -> ! {
    entry(aux);
    exit()
}

/// Park the running thread until `wake_tick`. Called by the timer device
/// with the deadline already computed.
pub(crate) fn sleep_until(wake_tick: u64) {
    let _guard = DisableInterrupts::new();
    let cur = current_tid();
    SCHED.with(|s| {
        let priority = s.priority_of(cur);
        let thread = s.get_mut(cur).unwrap();
        debug_assert!(thread.wake_tick.is_none());
        thread.wake_tick = Some(wake_tick);
        s.sleepers.insert(cur, wake_tick, priority);
    });
    block_current();
}

/// The dispatcher. Interrupts off, outgoing thread already moved out of
/// RUNNING by the caller. Picks the next thread and switches to it; the
/// post-switch tail (`finish_switch`) reaps dead threads from the
/// incoming stack.
fn schedule() {
    debug_assert!(!interrupts::are_enabled());
    let cur = current_tid();

    let switch_to = SCHED.with(|s| {
        let next = s.pick_next();
        s.slice_ticks = 0;
        if next == cur {
            s.get_mut(cur).unwrap().state = ThreadState::Running;
            return None;
        }

        let idle = s.idle;
        {
            let thread = s.get_mut(next).unwrap();
            debug_assert!(
                thread.state == ThreadState::Ready || idle == Some(next),
                "dispatched a thread that is not ready"
            );
            thread.state = ThreadState::Running;
        }
        let next_sp = s.get(next).unwrap().sp;
        let prev = s.get_mut(cur).unwrap();
        debug_assert_ne!(prev.state, ThreadState::Running, "outgoing thread still RUNNING");
        Some((prev as *mut Thread, next_sp))
    });

    if let Some((prev, next_sp)) = switch_to {
        // Safety: interrupts are off, `prev` is the thread running on
        // this stack and `next_sp` was saved by an earlier switch (or
        // built by `context::prepare`).
        unsafe { context::switch(prev, next_sp) };
    }
}

/// Tail of every context switch, running on the incoming thread's stack.
pub(super) extern "C" fn finish_switch(prev: *mut Thread) {
    // The outgoing thread is fully switched out now, so if it was dying
    // its stack is no longer in use and can be freed.
    let _ = prev;
    SCHED.with(|s| s.reap_dying());
}

/// Scheduler work for one timer tick. Runs in interrupt context with
/// interrupts masked; must not block.
pub(crate) fn note_tick(now: u64) {
    let cur = current_tid();
    SCHED.with(|s| {
        if !s.enabled {
            return;
        }

        if s.idle == Some(cur) {
            s.idle_ticks += 1;
        } else {
            s.kernel_ticks += 1;
        }

        // Wake-ups happen before the governor samples so a thread whose
        // deadline lands on this tick counts as ready in load_avg.
        s.wake_sleepers(now);

        if s.mode == SchedulerMode::Mlfqs {
            mlfqs::tick(s, cur);
            if now % u64::from(crate::devices::timer::TIMER_FREQ) == 0 {
                mlfqs::update_second(s, cur);
            }
            if now % 4 == 0 {
                mlfqs::recompute_priorities(s);
            }
        }

        s.slice_ticks += 1;
        if s.slice_ticks >= TIME_SLICE {
            s.yield_requested = true;
        }
    });
}

pub(crate) fn interrupt_entered() {
    SCHED.with(|s| s.intr_depth += 1);
}

pub(crate) fn interrupt_exited() {
    SCHED.with(|s| s.intr_depth -= 1);
}

/// Whether execution is currently inside an external interrupt handler.
pub fn in_intr_context() -> bool {
    SCHED.with(|s| s.intr_depth > 0)
}

/// Consume a pending yield request (set by slice expiry). The interrupt
/// handler calls this after the EOI and yields on a true return.
pub(crate) fn take_yield_request() -> bool {
    SCHED.with(|s| core::mem::take(&mut s.yield_requested))
}

/// Yield if some ready thread now outranks the running one. From
/// interrupt context this degrades to a yield-on-return request.
pub(crate) fn check_preempt() {
    let _guard = DisableInterrupts::new();
    let cur = current_tid();

    enum Action {
        None,
        Yield,
        YieldOnReturn,
    }

    let action = SCHED.with(|s| {
        if !s.enabled {
            return Action::None;
        }
        let outranked = s
            .ready
            .first()
            .is_some_and(|&head| s.priority_of(head) > s.priority_of(cur));
        match (outranked, s.intr_depth > 0) {
            (false, _) => Action::None,
            (true, false) => Action::Yield,
            (true, true) => Action::YieldOnReturn,
        }
    });

    match action {
        Action::None => {}
        Action::Yield => yield_now(),
        Action::YieldOnReturn => SCHED.with(|s| s.yield_requested = true),
    }
}

/// Tid of the running thread, found through its stack header.
pub fn current_tid() -> Tid {
    with_current(|t| t.tid)
}

/// Name of the running thread.
pub fn thread_name() -> String {
    with_current(|t| t.name.clone())
}

/// Effective priority of the running thread.
pub fn get_priority() -> i32 {
    let cur = current_tid();
    SCHED.with(|s| s.priority_of(cur))
}

/// Set the running thread's base priority. Inert under MLFQS. The
/// effective priority keeps any active donation on top of the new base,
/// and the caller yields if it no longer outranks the ready queue.
pub fn set_priority(new: i32) {
    assert!((PRI_MIN..=PRI_MAX).contains(&new), "priority out of range");
    let cur = current_tid();
    let inert = SCHED.with(|s| {
        if s.mode == SchedulerMode::Mlfqs {
            return true;
        }
        s.get_mut(cur).unwrap().base_priority = new;
        s.refresh_priority(cur);
        false
    });
    if !inert {
        check_preempt();
    }
}

/// Effective priority of an arbitrary thread; used by waiter-list
/// ordering, which must see donations as soon as they land.
pub(crate) fn thread_priority(tid: Tid) -> i32 {
    SCHED.with(|s| s.priority_of(tid))
}

/// Set the running thread's niceness, recomputing its governed priority.
pub fn set_niceness(nice: i32) {
    let nice = nice.clamp(NICE_MIN, NICE_MAX);
    let cur = current_tid();
    let governed = SCHED.with(|s| {
        s.get_mut(cur).unwrap().nice = nice;
        if s.mode != SchedulerMode::Mlfqs {
            return false;
        }
        let p = mlfqs::priority_for(s.get(cur).unwrap());
        let thread = s.get_mut(cur).unwrap();
        thread.priority = p;
        thread.base_priority = p;
        true
    });
    if governed {
        check_preempt();
    }
}

pub fn get_niceness() -> i32 {
    with_current(|t| t.nice)
}

/// 100 times the system load average, rounded to nearest.
pub fn get_load_avg() -> i32 {
    SCHED.with(|s| s.load_avg.mul_int(100).round())
}

/// 100 times the running thread's recent CPU estimate, rounded.
pub fn get_recent_cpu() -> i32 {
    with_current(|t| t.recent_cpu.mul_int(100).round())
}

// Donation plumbing, used by `sync::lock`. All of it runs with interrupts
// already masked by the lock operations.

/// Whether donation applies: only in priority mode.
pub(crate) fn donation_enabled() -> bool {
    SCHED.with(|s| s.mode == SchedulerMode::Priority)
}

/// Record that the running thread waits on `lock` and push its priority
/// down the holder chain, at most `DONATION_DEPTH_MAX` hops.
pub(crate) fn donate_to(holder: Tid, lock: *const Lock) {
    debug_assert!(!interrupts::are_enabled());
    let cur = current_tid();
    SCHED.with(|s| {
        s.get_mut(cur).unwrap().waiting_on_lock = Some(lock);
        let h = s.get_mut(holder).expect("donation to unknown thread");
        if !h.donors.contains(&cur) {
            h.donors.push(cur).expect("donor list full");
        }

        let mut donor = cur;
        for _ in 0..DONATION_DEPTH_MAX {
            let Some(lock_ptr) = s.get(donor).unwrap().waiting_on_lock else {
                break;
            };
            // Safety: a lock outlives every thread blocked on it, and
            // interrupts stay masked for the whole walk.
            let Some(owner) = (unsafe { &*lock_ptr }).holder_tid() else {
                break;
            };
            let donor_priority = s.priority_of(donor);
            let raised = {
                let t = s.get_mut(owner).expect("lock held by unknown thread");
                if t.priority < donor_priority {
                    t.priority = donor_priority;
                    true
                } else {
                    false
                }
            };
            if raised && s.get(owner).unwrap().state == ThreadState::Ready {
                s.requeue(owner);
            }
            donor = owner;
        }
    });
}

/// The running thread got its lock; it no longer waits on anything.
pub(crate) fn clear_waiting_on_lock() {
    debug_assert!(!interrupts::are_enabled());
    let cur = current_tid();
    SCHED.with(|s| s.get_mut(cur).unwrap().waiting_on_lock = None);
}

/// Drop every donor that was waiting on `lock` and restore the running
/// thread's effective priority from what remains.
pub(crate) fn strip_donations_for(lock: *const Lock) {
    debug_assert!(!interrupts::are_enabled());
    let cur = current_tid();
    SCHED.with(|s| {
        let donors = s.get(cur).unwrap().donors.clone();
        let mut kept: heapless::Vec<Tid, MAX_THREADS> = heapless::Vec::new();
        for donor in donors {
            let still_waiting_here =
                s.get(donor).is_some_and(|t| t.waiting_on_lock == Some(lock));
            if !still_waiting_here {
                let _ = kept.push(donor);
            }
        }
        s.get_mut(cur).unwrap().donors = kept;
        s.refresh_priority(cur);
    });
}

/// A point-in-time snapshot of one thread, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct ThreadStat {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub priority: i32,
}

/// Snapshot every live thread.
pub fn stats() -> Vec<ThreadStat> {
    SCHED.with(|s| {
        s.threads
            .iter()
            .map(|t| ThreadStat {
                tid: t.tid,
                name: t.name.clone(),
                state: t.state,
                priority: t.priority,
            })
            .collect()
    })
}

/// Log the tick accounting split.
pub fn print_stats() {
    let (idle, kernel) = SCHED.with(|s| (s.idle_ticks, s.kernel_ticks));
    log::info!("Scheduler: {} idle ticks, {} kernel ticks", idle, kernel);
}
