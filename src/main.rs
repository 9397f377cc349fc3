/*
 * Tern Kernel Entry Point
 *
 * Boot path for the Tern teaching kernel. The loader drops us at `_start`
 * in long mode; we switch onto our own kernel stack and continue in
 * `kstart`, which brings the subsystems up in dependency order (serial,
 * logging, descriptors, heap, tick source, scheduler) and then runs the
 * configured workload, by default the in-kernel self-test suite.
 *
 * The boot stack doubles as the first thread's stack: the scheduler
 * claims it during initialization and turns the booting context into the
 * "main" thread.
 */

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![allow(dead_code)]

extern crate alloc;
extern crate rlibc;

use core::panic::PanicInfo;

mod arch;
mod devices;
mod drivers;
mod memory;
mod scheduler;
mod sync;
mod tests;
mod utils;

#[repr(C, align(0x10000))]
pub struct AlignedBspStack([u8; scheduler::STACK_SIZE]);

/// Boot stack, aligned like every thread stack so the scheduler can adopt
/// it as the main thread's stack.
#[unsafe(no_mangle)]
pub static mut BSP_STACK: AlignedBspStack = AlignedBspStack([0; scheduler::STACK_SIZE]);

/// Kernel command line. The loader writes a NUL-terminated string here
/// before jumping to `_start`; an untouched buffer reads as empty.
///
/// Recognized flags: `-mlfqs` selects the MLFQS governor, `run=<test>`
/// runs one self-test instead of the whole suite.
#[unsafe(no_mangle)]
pub static mut BOOT_CMDLINE: [u8; 256] = [0; 256];

fn boot_cmdline() -> &'static str {
    // Only the loader writes this, and only before `_start`.
    let bytes = unsafe { &*(&raw const BOOT_CMDLINE) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..len]).unwrap_or("")
}

/// Raw entry point: move onto the kernel stack, then into Rust.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "lea rax, [rip + BSP_STACK]",
        "add rax, {stack_size}",
        "mov rsp, rax",
        "jmp kstart",
        stack_size = const scheduler::STACK_SIZE,
    );
}

/// Rust kernel entry, running on the BSP stack.
#[unsafe(no_mangle)]
pub extern "C" fn kstart() -> ! {
    drivers::serial::init_debug_port();
    utils::debug::logger::init(true);
    log::info!("Tern kernel starting...");

    arch::x86_64::gdt::init();
    arch::x86_64::idt::init();

    memory::init();

    // PIC remap and PIT programming; the tick starts arriving once
    // interrupts go live below.
    drivers::system::init();

    let cmdline = boot_cmdline();
    let mode = if cmdline.split_whitespace().any(|w| w == "-mlfqs") {
        scheduler::SchedulerMode::Mlfqs
    } else {
        scheduler::SchedulerMode::Priority
    };
    unsafe {
        scheduler::init(mode, (&raw mut BSP_STACK).cast());
    }

    scheduler::start();
    arch::x86_64::interrupts::enable();
    log::info!("Interrupts enabled");

    devices::timer::calibrate();

    tests::run(cmdline);

    devices::timer::print_stats();
    scheduler::print_stats();
    log::info!("Boot thread going idle");
    loop {
        x86_64::instructions::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        x86_64::instructions::hlt();
    }
}
