//! Legacy 8259 PIC (Programmable Interrupt Controller) pair.
//!
//! By default IRQ 0-7 land on vectors 0x08-0x0f, on top of CPU exceptions.
//! `init` moves the master to 0x20-0x27 and the slave to 0x28-0x2f, then
//! unmasks every line. Each delivered IRQ must be acknowledged with
//! [`end_of_interrupt`] before the PIC sends another one of equal or lower
//! priority.

use crate::port::{io_wait, outb};

/// I/O port addresses for the master PIC.
const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;

/// I/O port addresses for the slave PIC.
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: begin initialization, edge triggered, cascade mode, ICW4 follows.
const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
/// ICW4: 8086/88 mode.
const ICW4_8086: u8 = 0x01;
/// OCW2: non-specific end of interrupt.
const EOI: u8 = 0x20;

/// First vector of the master PIC (IRQ 0-7).
pub const PIC1_OFFSET: u8 = 0x20;
/// First vector of the slave PIC (IRQ 8-15).
pub const PIC2_OFFSET: u8 = 0x28;

/// Remap both PICs to vectors 0x20-0x2f and unmask all IRQs.
///
/// Interrupts must be disabled at the CPU while this runs.
pub fn init() {
    unsafe {
        // Mask everything while reprogramming.
        outb(PIC1_DATA, 0xFF);
        outb(PIC2_DATA, 0xFF);

        outb(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();
        outb(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();

        // ICW2: vector offsets
        outb(PIC1_DATA, PIC1_OFFSET);
        io_wait();
        outb(PIC2_DATA, PIC2_OFFSET);
        io_wait();

        // ICW3: slave on master's IRQ 2; slave cascade identity 2
        outb(PIC1_DATA, 0x04);
        io_wait();
        outb(PIC2_DATA, 0x02);
        io_wait();

        outb(PIC1_DATA, ICW4_8086);
        io_wait();
        outb(PIC2_DATA, ICW4_8086);
        io_wait();

        outb(PIC1_DATA, 0x00);
        outb(PIC2_DATA, 0x00);
    }
}

/// PIC command ports that must see an EOI for `vector`.
///
/// The master always needs one; the slave too when the IRQ came from it.
pub fn eoi_targets(vector: u8) -> &'static [u16] {
    assert!(
        (PIC1_OFFSET..PIC2_OFFSET + 8).contains(&vector),
        "vector {vector:#04x} is not a PIC interrupt"
    );
    if vector >= PIC2_OFFSET {
        &[PIC1_COMMAND, PIC2_COMMAND]
    } else {
        &[PIC1_COMMAND]
    }
}

/// Acknowledge the interrupt delivered on `vector`.
pub fn end_of_interrupt(vector: u8) {
    for &port in eoi_targets(vector) {
        unsafe { outb(port, EOI) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slave_interrupts_acknowledge_both_chips() {
        assert_eq!(eoi_targets(0x20), &[PIC1_COMMAND]);
        assert_eq!(eoi_targets(0x27), &[PIC1_COMMAND]);
        assert_eq!(eoi_targets(0x28), &[PIC1_COMMAND, PIC2_COMMAND]);
        assert_eq!(eoi_targets(0x2f), &[PIC1_COMMAND, PIC2_COMMAND]);
    }

    #[test]
    #[should_panic(expected = "not a PIC interrupt")]
    fn exceptions_are_not_acknowledged() {
        eoi_targets(0x0e);
    }
}
