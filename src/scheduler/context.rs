/*
 * Context Switch
 *
 * The one place registers are touched directly. A switched-out thread
 * keeps its callee-saved registers in a small frame on its own stack and
 * its stack pointer in the thread record; switching is: push the frame,
 * store RSP, load the other thread's RSP, pop the frame.
 *
 * The tail of the switch jumps (not calls) into `finish_switch` with the
 * outgoing thread still in RDI, so cleanup runs on the incoming stack and
 * the eventual `ret` lands wherever the incoming thread originally called
 * `switch` from. A freshly created thread fakes that return address to
 * point at `thread_entry`, which unpacks the entry function and its
 * argument from the frame and starts the thread.
 */

use core::arch::naked_asm;

use super::thread::Thread;

/// Callee-saved register area at the top of a switched-out stack.
///
/// Field order matches the pop sequence in `switch`; the three trailing
/// slots only matter for a thread's first run.
#[repr(C)]
struct SwitchFrame {
    r15: usize,
    r14: usize,
    r13: usize,
    r12: usize,
    rbx: usize,
    rbp: usize,
    /// Where `switch` returns to; `thread_entry` for a fresh thread.
    ret_addr: usize,
    /// Entry function, popped by `thread_entry`.
    entry: usize,
    /// Entry argument, popped by `thread_entry`.
    aux: usize,
}

/// Lay out the initial frame so the first switch into `thread` lands in
/// `thread_entry` with `entry` and `aux` on top of the stack.
pub(super) fn prepare(thread: &mut Thread, entry: fn(usize), aux: usize) {
    let top = thread.stack_top();
    let frame = (top - core::mem::size_of::<SwitchFrame>()) as *mut SwitchFrame;
    unsafe {
        frame.write(SwitchFrame {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            ret_addr: thread_entry as *const () as usize,
            entry: entry as usize,
            aux,
        });
    }
    thread.sp = frame as usize;
}

/// Swap stacks: save the outgoing thread's callee-saved state, then resume
/// the incoming one.
///
/// # Safety
///
/// Interrupts must be off. `prev` must be the currently running thread
/// (its `sp` field, at offset 0, receives the saved stack pointer) and
/// `next_sp` a stack pointer previously produced by this function or by
/// `prepare`.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch(prev: *mut Thread, next_sp: usize) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        // Thread.sp is the first field, so `prev` doubles as its address.
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        // RDI still carries the outgoing thread; finish_switch reaps it if
        // it is dying, then returns through the saved return address.
        "jmp {finish}",
        finish = sym super::finish_switch,
    )
}

/// First instructions of every spawned thread.
///
/// The dispatcher hands control here with interrupts off and the entry
/// function plus argument on the stack. Interrupts are enabled before any
/// thread code runs; `thread_start` is the extern "C" boundary that takes
/// over (the `call` keeps the entry stack ABI-aligned and never returns).
#[unsafe(naked)]
unsafe extern "C" fn thread_entry() -> ! {
    naked_asm!(
        "pop rdi",
        "pop rsi",
        "sti",
        "call {start}",
        start = sym super::thread_start,
    )
}
