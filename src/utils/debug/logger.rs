/*
 * Kernel Logging
 *
 * Hooks the `log` facade up to the serial console. Records print as
 * "[LEVEL] message" lines on COM2, which is where QEMU and real hardware
 * debugging sessions watch for kernel output.
 */

use log::{Level, LevelFilter, Metadata, Record};

/// Serial-backed logger for the kernel.
struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the logger, optionally clearing the terminal first.
///
/// # Panics
///
/// Panics if a logger was already installed.
pub fn init(clearscr: bool) {
    if clearscr {
        crate::serial_print!("\u{001B}[2J\u{001B}[H");
    }

    match log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info)) {
        Ok(()) => crate::serial_println!("Logger initialized"),
        Err(err) => panic!("logger initialization failed: {}", err),
    }
}
