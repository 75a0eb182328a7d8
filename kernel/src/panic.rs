// =============================================================================
// Pintle: Kernel Panic Handler
// =============================================================================
//
// A kernel panic is fatal: an assertion in the scheduler or a sync
// primitive failed, a stack canary was found overwritten, or an unexpected
// interrupt arrived. We print what we know to serial and halt with
// interrupts off. No unwinding (panic = "abort"), no reboot, so the
// message stays on screen for whoever is debugging.
//
// =============================================================================

use core::panic::PanicInfo;

use klog::println;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    khal::cpu::disable_interrupts();
    // SAFETY: interrupts are off and we never return to whoever held the port.
    unsafe { khal::serial::force_unlock() };

    println!();
    println!("==========================================================");
    println!("  KERNEL PANIC (Pintle)");
    println!("==========================================================");
    if let Some(thread) = crate::SCHEDULER.get().and_then(|s| s.try_current_name()) {
        println!("  Thread:   {}", thread);
    }
    match info.location() {
        Some(location) => println!("  Location: {}:{}", location.file(), location.line()),
        None => println!("  Location: <unknown>"),
    }
    println!("  Message:  {}", info.message());
    println!("==========================================================");
    println!("  System halted. Reboot required.");
    println!("==========================================================");

    khal::cpu::halt_forever()
}
