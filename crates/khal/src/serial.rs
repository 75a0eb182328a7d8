//! Serial port (COM1 UART 16550) driver.
//!
//! Polled output only; the UART's own interrupt line stays disabled so the
//! timer is the only device the PIC ever delivers.

use core::fmt;
use spin::Mutex;

use crate::port::{inb, outb};

/// COM1 base port address
const COM1_PORT: u16 = 0x3F8;

/// Line status register: transmit holding register empty.
const LSR_THR_EMPTY: u8 = 0x20;

/// Serial port driver for COM1
pub struct Serial {
    initialized: bool,
}

impl Serial {
    const fn new() -> Self {
        Self { initialized: false }
    }

    /// Initialize the serial port (115200 baud, 8N1).
    ///
    /// Returns whether the loopback self-test passed. The port is usable
    /// either way; emulators without a UART simply swallow the bytes.
    pub fn init(&mut self) -> bool {
        unsafe {
            // Disable all interrupts
            outb(COM1_PORT + 1, 0x00);

            // Enable DLAB (set baud rate divisor)
            outb(COM1_PORT + 3, 0x80);

            // Divisor 1 = 115200 baud
            outb(COM1_PORT, 0x01);
            outb(COM1_PORT + 1, 0x00);

            // 8 bits, no parity, one stop bit (clear DLAB)
            outb(COM1_PORT + 3, 0x03);

            // Enable FIFO, clear them, with 14-byte threshold
            outb(COM1_PORT + 2, 0xC7);

            // Loopback test
            outb(COM1_PORT + 4, 0x1E);
            outb(COM1_PORT, 0xAE);
            let loopback_ok = inb(COM1_PORT) == 0xAE;

            // Normal operation: DTR, RTS, OUT1. OUT2 stays clear so the
            // UART cannot raise IRQ 4.
            outb(COM1_PORT + 4, 0x07);

            self.initialized = true;
            loopback_ok
        }
    }

    fn is_transmit_empty() -> bool {
        unsafe { inb(COM1_PORT + 5) & LSR_THR_EMPTY != 0 }
    }

    /// Write a byte to the serial port
    pub fn write_byte(&self, byte: u8) {
        if !self.initialized {
            return;
        }

        while !Self::is_transmit_empty() {
            core::hint::spin_loop();
        }

        unsafe {
            outb(COM1_PORT, byte);
        }
    }

    /// Write a string, translating `\n` to `\r\n` for terminals.
    pub fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Serial::write_str(self, s);
        Ok(())
    }
}

/// Global serial port instance (COM1)
static SERIAL: Mutex<Serial> = Mutex::new(Serial::new());

/// Initialize the global serial port.
pub fn init() -> bool {
    SERIAL.lock().init()
}

/// Write a string to the serial port.
///
/// Callers that may race with interrupt handlers must mask interrupts
/// around this; the port lock is not interrupt safe on its own.
pub fn write_str(s: &str) {
    SERIAL.lock().write_str(s);
}

/// Write formatted arguments to the serial port.
pub fn write_fmt(args: fmt::Arguments) -> fmt::Result {
    use fmt::Write;
    SERIAL.lock().write_fmt(args)
}

/// Break the port lock after a panic so the report can still go out.
///
/// # Safety
///
/// The previous holder must never run again.
pub unsafe fn force_unlock() {
    if SERIAL.is_locked() {
        unsafe { SERIAL.force_unlock() };
    }
}
