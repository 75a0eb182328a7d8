//! CPU control: halting and the interrupt flag.
//!
//! Thin wrappers over privileged instructions. The interrupt-flag helpers
//! go through the `x86_64` crate so callers never write `cli`/`sti` by hand.

use x86_64::instructions::interrupts;

/// Disable interrupts and halt for good. Used after a panic or shutdown.
#[inline(always)]
pub fn halt_forever() -> ! {
    loop {
        interrupts::disable();
        x86_64::instructions::hlt();
    }
}

/// Whether RFLAGS.IF is set.
#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Set RFLAGS.IF.
#[inline]
pub fn enable_interrupts() {
    interrupts::enable();
}

/// Clear RFLAGS.IF.
#[inline]
pub fn disable_interrupts() {
    interrupts::disable();
}

/// Enable interrupts and halt as one step.
///
/// `sti` delays recognition by one instruction, so an interrupt that is
/// already pending wakes the following `hlt` instead of being taken
/// between the two and lost until the next tick.
#[inline]
pub fn enable_and_halt() {
    interrupts::enable_and_hlt();
}

/// Run `f` with interrupts disabled, restoring the previous state.
#[inline]
pub fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    interrupts::without_interrupts(f)
}

/// Code segment selector currently in CS.
#[inline]
pub fn code_selector() -> u16 {
    use x86_64::instructions::segmentation::{Segment, CS};
    CS::get_reg().0
}
