/*
 * Kernel Print Macros
 *
 * no_std replacements for print!/println! that write to the serial debug
 * port. The log facade is the preferred interface; these exist for the
 * logger backend and for raw test output.
 */

/// Print formatted text to the serial console.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::drivers::serial::_print(format_args!($($arg)*))
    };
}

/// Print formatted text followed by a newline to the serial console.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(concat!($fmt, "\n"), $($arg)*));
}
