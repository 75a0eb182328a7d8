//! The scheduler's view of the machine: IF flag, 8259 PIC and the IDT.

use khal::idt::{GateType, Idt, PrivilegeLevel};
use kthread::{IntrLevel, Platform};
use spin::Mutex;

use crate::context::X86Context;
use crate::trap;

/// The live descriptor table. Gates are rewritten as handlers register.
static IDT: Mutex<Idt> = Mutex::new(Idt::new());

/// Point every vector at its stub as a ring-0 interrupt gate and load the
/// table. Unregistered vectors then reach the scheduler's "unexpected
/// interrupt" path instead of faulting on a missing gate.
pub fn init_idt() {
    let selector = khal::cpu::code_selector();
    let mut idt = IDT.lock();
    for vector in 0..=u8::MAX {
        idt.set_gate(
            vector,
            trap::stub_address(vector),
            selector,
            PrivilegeLevel::Ring0,
            GateType::Interrupt,
        );
    }
    // SAFETY: IDT is a static; its table never moves.
    unsafe { idt.load() };
    klog::debug!("IDT loaded, CS={:#06x}", selector);
}

/// Bare-metal x86_64 with the legacy PIC pair.
pub struct X86Platform;

impl Platform for X86Platform {
    type Context = X86Context;

    fn interrupts_enabled(&self) -> bool {
        khal::cpu::interrupts_enabled()
    }

    fn enable_interrupts(&self) {
        khal::cpu::enable_interrupts();
    }

    fn disable_interrupts(&self) {
        khal::cpu::disable_interrupts();
    }

    fn wait_for_interrupt(&self) {
        khal::cpu::enable_and_halt();
    }

    fn end_of_interrupt(&self, vector: u8) {
        khal::pic::end_of_interrupt(vector);
    }

    fn install_gate(&self, vector: u8, dpl: u8, level: IntrLevel) {
        let Some(dpl) = PrivilegeLevel::from_dpl(dpl) else {
            panic!("descriptor privilege level {dpl} out of range");
        };
        let gate_type = match level {
            IntrLevel::On => GateType::Trap,
            IntrLevel::Off => GateType::Interrupt,
        };
        khal::cpu::without_interrupts(|| {
            IDT.lock().set_gate(
                vector,
                trap::stub_address(vector),
                khal::cpu::code_selector(),
                dpl,
                gate_type,
            );
        });
    }
}
