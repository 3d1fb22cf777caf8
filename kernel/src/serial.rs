//! Serial console output (COM1, 0x3F8): the kernel's only console.
//!
//! Lily has no VGA text-mode or framebuffer console of its own — every
//! diagnostic, boot-stage, and panic message goes out over the serial
//! line, which is also what the bare-metal integration tests under
//! `tests/` read back from under QEMU.

use core::fmt;

use uart_16550::SerialPort as Uart;
use x86_64::instructions::interrupts;

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use core::fmt::Write;

    interrupts::without_interrupts(|| {
        let mut port = unsafe { Uart::new(0x3F8) };
        let _ = port.write_fmt(args);
    });
}
