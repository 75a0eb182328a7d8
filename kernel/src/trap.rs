//! Interrupt entry stubs and the common trap path.
//!
//! Every vector gets a 16-byte stub. Stubs for exceptions without a CPU
//! error code push a zero in its place, then all of them push their vector
//! number and jump to `intr_common`, which saves the general purpose
//! registers and calls [`trap_dispatch`] with a pointer to the resulting
//! [`InterruptFrame`].

use kthread::InterruptFrame;

/// Distance between consecutive stubs.
const STUB_SIZE: usize = 16;

core::arch::global_asm!(
    r#"
    .section .text
    .p2align 4
    .global intr_stubs
intr_stubs:
    .set vec, 0
    .rept 256
    .p2align 4
    .if (vec == 8) || (vec == 10) || (vec == 11) || (vec == 12) || (vec == 13) || (vec == 14) || (vec == 17) || (vec == 21) || (vec == 29) || (vec == 30)
    .else
    pushq $0
    .endif
    pushq $vec
    jmp intr_common
    .set vec, vec + 1
    .endr

intr_common:
    pushq %rax
    pushq %rbx
    pushq %rcx
    pushq %rdx
    pushq %rsi
    pushq %rdi
    pushq %rbp
    pushq %r8
    pushq %r9
    pushq %r10
    pushq %r11
    pushq %r12
    pushq %r13
    pushq %r14
    pushq %r15
    movq %rsp, %rdi
    cld
    call trap_dispatch
    popq %r15
    popq %r14
    popq %r13
    popq %r12
    popq %r11
    popq %r10
    popq %r9
    popq %r8
    popq %rbp
    popq %rdi
    popq %rsi
    popq %rdx
    popq %rcx
    popq %rbx
    popq %rax
    addq $16, %rsp
    iretq
"#,
    options(att_syntax)
);

unsafe extern "C" {
    static intr_stubs: u8;
}

/// Address of the entry stub for `vector`.
pub fn stub_address(vector: u8) -> usize {
    let base = &raw const intr_stubs as usize;
    base + vector as usize * STUB_SIZE
}

/// Called by `intr_common` with interrupts masked.
#[unsafe(no_mangle)]
extern "C" fn trap_dispatch(frame: &mut InterruptFrame) {
    match crate::SCHEDULER.get() {
        Some(sched) => sched.handle_interrupt(frame),
        None => panic!("trap before the scheduler is up\n{frame}"),
    }
}
