//! x86 port I/O primitives.
//!
//! `inb` / `outb` wrappers for port-mapped I/O, plus the short delay some
//! legacy controllers need between consecutive commands.

/// Write a byte to an x86 I/O port.
///
/// # Safety
///
/// Writing to an arbitrary I/O port can have side effects on hardware.
/// The caller must ensure the port and value are valid.
#[inline]
pub unsafe fn outb(port: u16, value: u8) {
    core::arch::asm!(
        "out dx, al",
        in("dx") port,
        in("al") value,
        options(nomem, nostack, preserves_flags)
    );
}

/// Read a byte from an x86 I/O port.
///
/// # Safety
///
/// Reading from an arbitrary I/O port can have side effects on hardware.
/// The caller must ensure the port is valid.
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    core::arch::asm!(
        "in al, dx",
        in("dx") port,
        out("al") value,
        options(nomem, nostack, preserves_flags)
    );
    value
}

/// Unused diagnostic port; writing to it takes roughly a microsecond.
const POST_PORT: u16 = 0x80;

/// Give a slow device time to settle between two port writes.
#[inline]
pub fn io_wait() {
    // SAFETY: port 0x80 is the POST code register; writes are harmless.
    unsafe { outb(POST_PORT, 0) }
}
