//! x86_64 thread context and the context switch.
//!
//! A suspended thread is just its saved stack pointer. Everything else it
//! needs (callee-saved registers and the address to resume at) sits on its
//! own stack, pushed by `context_switch_asm`.

use kthread::{ExecutionContext, KernelStack};

/// Saved kernel stack pointer of a thread that is not running.
#[derive(Debug)]
#[repr(C)]
pub struct X86Context {
    rsp: u64,
}

/// Frame `context_switch_asm` pops when resuming a thread. Field order
/// matches its pop order.
#[repr(C)]
struct SwitchFrame {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    rip: u64,
}

core::arch::global_asm!(
    ".global context_switch_asm",
    "context_switch_asm:",
    // rdi = &mut from.rsp, rsi = to.rsp
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    "",
    // First switch into a prepared thread lands here with the entry point in
    // r12 and its argument in r13.
    ".global thread_trampoline",
    "thread_trampoline:",
    "mov rdi, r12",
    "mov rsi, r13",
    "xor ebp, ebp",
    "call {start}",
    "ud2",
    start = sym thread_start,
);

unsafe extern "C" {
    fn context_switch_asm(from_rsp: *mut u64, to_rsp: u64);
    fn thread_trampoline();
}

extern "C" fn thread_start(entry: usize, arg: usize) -> ! {
    // SAFETY: `prepare` stored a `fn(usize)` in r12.
    let entry: fn(usize) = unsafe { core::mem::transmute(entry) };
    entry(arg);
    panic!("thread entry returned");
}

// SAFETY: `switch` saves every callee-saved register and resumes the target
// at the exact point it switched away, or at `thread_trampoline` for a
// fresh thread.
unsafe impl ExecutionContext for X86Context {
    fn boot() -> Self {
        Self { rsp: 0 }
    }

    fn prepare(stack: &mut KernelStack, entry: fn(usize), arg: usize) -> Self {
        let top = stack.top() & !0xf;
        let sp = top - core::mem::size_of::<SwitchFrame>() as u64;
        let frame = SwitchFrame {
            r15: 0,
            r14: 0,
            r13: arg as u64,
            r12: entry as usize as u64,
            rbx: 0,
            rbp: 0,
            rip: thread_trampoline as usize as u64,
        };
        // SAFETY: `sp` lies inside the stack we own, above the canary.
        unsafe { (sp as *mut SwitchFrame).write(frame) };
        Self { rsp: sp }
    }

    unsafe fn switch(from: *mut Self, to: *const Self) {
        unsafe { context_switch_asm(&raw mut (*from).rsp, (*to).rsp) };
    }
}
