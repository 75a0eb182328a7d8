// =============================================================================
// Pintle: Kernel Entry Point
// =============================================================================
//
// Limine has put us in 64-bit long mode on the higher-half mapping, with a
// small boot stack and interrupts disabled. From here:
//
//   1. Serial logging, so everything after this can report.
//   2. Heap, since thread control blocks and stacks are heap allocated.
//   3. IDT with a stub on every vector, then the PIC and the 100 Hz timer.
//   4. Scheduler: the boot code becomes thread `main`, the idle thread is
//      created and interrupts are enabled.
//   5. Calibrate the busy-wait loop against the timer.
//   6. Run the scheduler checks, print tick statistics, halt.
//
// =============================================================================

#![no_std]
#![no_main]

extern crate alloc;

mod boot;
mod context;
mod demo;
mod heap;
mod panic;
mod platform;
mod trap;

use kthread::{SchedConfig, SchedPolicy, Scheduler};
use klog::LevelFilter;
use spin::Once;

use platform::X86Platform;

/// The one scheduler. Set once in `kmain`, read by the trap path.
pub static SCHEDULER: Once<Scheduler<X86Platform>> = Once::new();

/// The kernel's main entry point, jumped to by Limine.
#[unsafe(no_mangle)]
extern "C" fn kmain() -> ! {
    klog::init(LevelFilter::Info);
    klog::info!("Pintle booting");

    if !boot::is_supported() {
        panic!("Limine base revision not supported");
    }

    heap::init();
    platform::init_idt();
    khal::pic::init();
    khal::pit::init(khal::pit::TIMER_FREQ);

    let cmdline = boot::cmdline();
    let policy = SchedPolicy::from_cmdline(cmdline);
    klog::info!("command line '{}', policy {:?}", cmdline, policy);

    let sched = SCHEDULER.call_once(|| {
        let config = SchedConfig::new()
            .with_policy(policy)
            .with_timer_freq(khal::pit::TIMER_FREQ);
        Scheduler::new(X86Platform, config)
    });
    if let Err(err) = sched.start() {
        panic!("scheduler start failed: {err}");
    }
    sched.calibrate();

    if let Err(err) = demo::run(sched) {
        klog::error!("scheduler checks aborted: {}", err);
    }

    sched.shutdown();
    klog::info!("heap in use at shutdown: {} bytes", heap::used());
    khal::cpu::halt_forever()
}
