//! Interrupt Descriptor Table (IDT) for x86_64.
//!
//! One 16-byte gate per vector. Gates are rewritten at runtime as handlers
//! are registered, so the table lives in a `static` behind a lock and the
//! CPU is pointed at it once with [`Idt::load`].

use core::arch::asm;
use core::mem::size_of;

/// x86_64 supports 256 interrupt vectors (0-255).
pub const IDT_ENTRIES: usize = 256;

/// Privilege level a gate demands of software `int n` callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrivilegeLevel {
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

impl PrivilegeLevel {
    /// Map a numeric descriptor privilege level to its ring.
    pub const fn from_dpl(dpl: u8) -> Option<Self> {
        match dpl {
            0 => Some(Self::Ring0),
            1 => Some(Self::Ring1),
            2 => Some(Self::Ring2),
            3 => Some(Self::Ring3),
            _ => None,
        }
    }
}

/// Gate type for IDT entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateType {
    /// Interrupt gate - clears IF on entry.
    Interrupt = 0b1110,
    /// Trap gate - leaves IF as it was.
    Trap = 0b1111,
}

/// Type/attribute word of an IDT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EntryOptions(u16);

impl EntryOptions {
    /// Not present, ring 0, interrupt gate, no IST.
    #[inline]
    pub const fn new() -> Self {
        Self(0b0000_1110_0000_0000)
    }

    #[inline]
    pub const fn set_present(mut self, present: bool) -> Self {
        if present {
            self.0 |= 1 << 15;
        } else {
            self.0 &= !(1 << 15);
        }
        self
    }

    #[inline]
    pub const fn set_privilege_level(mut self, dpl: PrivilegeLevel) -> Self {
        self.0 = (self.0 & 0x9FFF) | ((dpl as u16) << 13);
        self
    }

    #[inline]
    pub const fn set_gate_type(mut self, gate_type: GateType) -> Self {
        self.0 = (self.0 & 0xF0FF) | ((gate_type as u16) << 8);
        self
    }

    #[inline]
    pub const fn present(self) -> bool {
        self.0 & (1 << 15) != 0
    }

    #[inline]
    pub const fn privilege_level(self) -> u8 {
        ((self.0 >> 13) & 0b11) as u8
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An entry in the Interrupt Descriptor Table.
///
/// Format (128 bits / 16 bytes):
/// - Bits 0-15:   Offset bits 0-15
/// - Bits 16-31:  Code segment selector
/// - Bits 32-47:  Options (IST, gate type, DPL, present)
/// - Bits 48-63:  Offset bits 16-31
/// - Bits 64-95:  Offset bits 32-63
/// - Bits 96-127: Reserved (must be 0)
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    options: EntryOptions,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    /// An entry that is not present. Delivering its vector raises #NP.
    #[inline]
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            options: EntryOptions::new(),
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    #[inline]
    pub const fn new(handler: usize, selector: u16, options: EntryOptions) -> Self {
        Self {
            offset_low: handler as u16,
            selector,
            options,
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }

    #[inline]
    pub fn handler(&self) -> usize {
        (self.offset_low as usize)
            | ((self.offset_mid as usize) << 16)
            | ((self.offset_high as usize) << 32)
    }

    #[inline]
    pub fn options(&self) -> EntryOptions {
        self.options
    }

    #[inline]
    pub fn selector(&self) -> u16 {
        self.selector
    }
}

/// The Interrupt Descriptor Table.
#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

impl Idt {
    /// A table with every entry missing.
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::missing(); IDT_ENTRIES],
        }
    }

    /// Point `vector` at `handler` in code segment `selector`.
    pub fn set_gate(
        &mut self,
        vector: u8,
        handler: usize,
        selector: u16,
        dpl: PrivilegeLevel,
        gate_type: GateType,
    ) {
        let options = EntryOptions::new()
            .set_present(true)
            .set_privilege_level(dpl)
            .set_gate_type(gate_type);
        self.entries[vector as usize] = IdtEntry::new(handler, selector, options);
    }

    #[inline]
    pub fn entry(&self, vector: u8) -> &IdtEntry {
        &self.entries[vector as usize]
    }

    /// Load this IDT into the CPU using `lidt`.
    ///
    /// Entries may still be rewritten afterwards; the CPU reads the table
    /// from memory on each delivery.
    ///
    /// # Safety
    ///
    /// The table must stay at this address for as long as it is loaded.
    pub unsafe fn load(&self) {
        let ptr = IdtPointer {
            limit: (size_of::<Self>() - 1) as u16,
            base: self as *const _ as u64,
        };

        unsafe {
            asm!(
                "lidt [{}]",
                in(reg) &ptr,
                options(readonly, nostack, preserves_flags)
            );
        }
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

/// Operand of `lidt`: limit then 64-bit base.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_hardware() {
        assert_eq!(size_of::<IdtEntry>(), 16);
        assert_eq!(size_of::<IdtPointer>(), 10);
        assert_eq!(size_of::<Idt>(), 16 * IDT_ENTRIES);
        assert_eq!(core::mem::align_of::<Idt>(), 16);
    }

    #[test]
    fn handler_offset_is_split_and_rejoined() {
        let entry = IdtEntry::new(0xffff_8000_1234_5678, 0x28, EntryOptions::new());
        assert_eq!(entry.handler(), 0xffff_8000_1234_5678);
        assert_eq!(entry.selector(), 0x28);
    }

    #[test]
    fn gate_options() {
        let mut idt = Idt::new();
        assert!(!idt.entry(0x30).options().present());

        idt.set_gate(0x30, 0x1000, 0x08, PrivilegeLevel::Ring3, GateType::Trap);
        let options = idt.entry(0x30).options();
        assert!(options.present());
        assert_eq!(options.privilege_level(), 3);
        assert_eq!(options.raw(), 0b1110_1111_0000_0000);

        idt.set_gate(0x20, 0x1000, 0x08, PrivilegeLevel::Ring0, GateType::Interrupt);
        assert_eq!(idt.entry(0x20).options().raw(), 0b1000_1110_0000_0000);
    }

    #[test]
    fn dpl_conversion() {
        assert_eq!(PrivilegeLevel::from_dpl(0), Some(PrivilegeLevel::Ring0));
        assert_eq!(PrivilegeLevel::from_dpl(3), Some(PrivilegeLevel::Ring3));
        assert_eq!(PrivilegeLevel::from_dpl(4), None);
    }
}
