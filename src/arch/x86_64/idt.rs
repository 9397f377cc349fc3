/*
 * Interrupt Descriptor Table
 *
 * Exception vectors 0-31 get handlers that report and halt; the only
 * hardware interrupt the kernel cares about is the PIT tick on IRQ0
 * (vector 32), which drives the scheduler.
 *
 * The timer handler runs on the interrupted thread's stack (no IST), which
 * is what allows a slice-expiry yield to context-switch from the handler
 * tail: the handler frame is simply saved on the outgoing thread's stack
 * and unwound when that thread is scheduled again.
 */

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::arch::x86_64::gdt;
use crate::drivers::system::pic;

/// Vector for IRQ0 after the PIC remap.
pub const TIMER_VECTOR: u8 = pic::PIC_1_OFFSET;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);

        idt[TIMER_VECTOR].set_handler_fn(timer_interrupt_handler);

        idt
    };
}

/// Load the IDT. Must run before interrupts are enabled.
pub fn init() {
    IDT.load();
    log::info!("IDT loaded");
}

/// PIT tick, IRQ0.
///
/// The CPU delivers this with interrupts masked. The tick body must not
/// block; if the running thread's slice is used up it requests a yield,
/// which is honored here after the EOI, once the handler has left
/// interrupt context.
extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    crate::scheduler::interrupt_entered();
    crate::devices::timer::interrupt_tick();
    crate::scheduler::interrupt_exited();

    pic::end_of_interrupt(TIMER_VECTOR);

    if crate::scheduler::take_yield_request() {
        crate::scheduler::yield_now();
    }
}

extern "x86-interrupt" fn divide_error_handler(frame: InterruptStackFrame) {
    panic!("divide error\n{:#?}", frame);
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    log::warn!("breakpoint at {:?}", frame.instruction_pointer);
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    panic!("invalid opcode\n{:#?}", frame);
}

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, _error_code: u64) -> ! {
    panic!("double fault\n{:#?}", frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!("general protection fault (error {:#x})\n{:#?}", error_code, frame);
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let addr = x86_64::registers::control::Cr2::read_raw();
    panic!("page fault at {:#x} ({:?})\n{:#?}", addr, error_code, frame);
}
