/*
 * Serial Debug Port
 *
 * COM2 carries all kernel output. The port sits behind a spin mutex, and
 * the print path masks interrupts around the lock so that a writer
 * preempted mid-line can never deadlock against a logging interrupt
 * handler on this single-CPU machine.
 */

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

lazy_static! {
    /// COM2, initialized on first use.
    pub static ref COM2: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(0x2F8) };
        port.init();
        Mutex::new(port)
    };
}

/// Force the port up early so boot messages are not lost.
pub fn init_debug_port() {
    lazy_static::initialize(&COM2);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    crate::arch::x86_64::interrupts::without_interrupts(|| {
        COM2.lock().write_fmt(args).expect("serial write failed");
    });
}
