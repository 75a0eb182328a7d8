//! Interrupt gate: vector dispatch and the interrupt mask.
//!
//! Every critical section in the crate is built on [`InterruptGate::mask`]:
//! on a single core, a thread that has interrupts masked cannot be
//! preempted, so nothing else observes its half-finished updates.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ops::RangeInclusive;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::RwLock;

use crate::context::ExecutionContext;

/// Number of interrupt vectors on x86_64.
pub const VECTOR_COUNT: usize = 256;

/// Vectors the remapped 8259 pair delivers hardware interrupts on.
pub const EXTERNAL_VECTORS: RangeInclusive<u8> = 0x20..=0x2f;

/// Timer (IRQ 0) vector.
pub const TIMER_VECTOR: u8 = 0x20;

/// IRQ 7 and IRQ 15 fire spuriously on real 8259s and have no handler.
pub const SPURIOUS_VECTORS: [u8; 2] = [0x27, 0x2f];

// ── Platform boundary ───────────────────────────────────────────

/// Whether maskable interrupts are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    On,
    Off,
}

/// Hardware services the scheduler needs from the architecture layer.
pub trait Platform: Send + Sync + 'static {
    type Context: ExecutionContext;

    fn interrupts_enabled(&self) -> bool;
    fn enable_interrupts(&self);
    fn disable_interrupts(&self);

    /// Enable interrupts and halt until the next one, as a single step so a
    /// wakeup cannot slip in between.
    fn wait_for_interrupt(&self);

    /// Acknowledge an external interrupt at the interrupt controller.
    fn end_of_interrupt(&self, vector: u8);

    /// Rewrite the descriptor for `vector`: callable from privilege `dpl`,
    /// entered with interrupts at `level`.
    fn install_gate(&self, vector: u8, dpl: u8, level: IntrLevel);

    /// Spin through `loops` iterations of an empty loop. Timer calibration
    /// counts these per tick, so every call must cost the same per loop.
    #[inline(never)]
    fn busy_wait(&self, loops: u64) {
        for i in 0..loops {
            core::hint::black_box(i);
        }
    }
}

// ── Interrupt frame ─────────────────────────────────────────────

/// Register state pushed by the entry stubs and the CPU.
///
/// Field order matches the push order of the kernel's stubs: general
/// purpose registers last-pushed-first, then the vector and error code,
/// then the hardware frame.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct InterruptFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vec_no: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl InterruptFrame {
    /// A zeroed frame for `vector`.
    pub fn new(vector: u8) -> Self {
        Self {
            vec_no: vector as u64,
            ..Self::default()
        }
    }

    pub fn vector(&self) -> u8 {
        self.vec_no as u8
    }
}

impl fmt::Display for InterruptFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Interrupt {:#04x} ({}) at rip={:#018x}",
            self.vec_no,
            vector_name(self.vector()),
            self.rip
        )?;
        writeln!(
            f,
            " error={:#018x} cs={:#06x} ss={:#06x} rflags={:#010x}",
            self.error_code, self.cs, self.ss, self.rflags
        )?;
        writeln!(
            f,
            " rax={:#018x} rbx={:#018x} rcx={:#018x} rdx={:#018x}",
            self.rax, self.rbx, self.rcx, self.rdx
        )?;
        writeln!(
            f,
            " rsi={:#018x} rdi={:#018x} rbp={:#018x} rsp={:#018x}",
            self.rsi, self.rdi, self.rbp, self.rsp
        )?;
        writeln!(
            f,
            " r8 ={:#018x} r9 ={:#018x} r10={:#018x} r11={:#018x}",
            self.r8, self.r9, self.r10, self.r11
        )?;
        write!(
            f,
            " r12={:#018x} r13={:#018x} r14={:#018x} r15={:#018x}",
            self.r12, self.r13, self.r14, self.r15
        )
    }
}

/// Diagnostic name of a CPU exception or remapped IRQ.
pub fn vector_name(vector: u8) -> &'static str {
    const EXCEPTIONS: [&str; 20] = [
        "#DE Divide Error",
        "#DB Debug Exception",
        "NMI Interrupt",
        "#BP Breakpoint Exception",
        "#OF Overflow Exception",
        "#BR BOUND Range Exceeded Exception",
        "#UD Invalid Opcode Exception",
        "#NM Device Not Available Exception",
        "#DF Double Fault Exception",
        "Coprocessor Segment Overrun",
        "#TS Invalid TSS Exception",
        "#NP Segment Not Present",
        "#SS Stack Fault Exception",
        "#GP General Protection Exception",
        "#PF Page-Fault Exception",
        "Reserved",
        "#MF x87 FPU Floating-Point Error",
        "#AC Alignment Check Exception",
        "#MC Machine-Check Exception",
        "#XF SIMD Floating-Point Exception",
    ];
    match vector {
        0..=19 => EXCEPTIONS[vector as usize],
        TIMER_VECTOR => "8254 Timer",
        0x27 | 0x2f => "Spurious IRQ",
        v if EXTERNAL_VECTORS.contains(&v) => "External IRQ",
        _ => "unknown",
    }
}

// ── Vector table ────────────────────────────────────────────────

pub type Handler = Arc<dyn Fn(&mut InterruptFrame) + Send + Sync>;

/// How a vector was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorInfo {
    pub name: &'static str,
    /// Lowest privilege allowed to raise the vector with `int`.
    pub dpl: u8,
    /// Interrupt level the handler is entered at.
    pub level: IntrLevel,
}

#[derive(Clone)]
struct VectorEntry {
    handler: Handler,
    dpl: u8,
    level: IntrLevel,
    name: &'static str,
}

/// The interrupt vector table plus the mask and interrupt-context state.
pub struct InterruptGate<P: Platform> {
    platform: P,
    vectors: RwLock<Vec<Option<VectorEntry>>>,
    /// Set while an external interrupt handler runs.
    in_external: AtomicBool,
    /// An external handler asked for a yield once it returns.
    yield_on_return: AtomicBool,
}

impl<P: Platform> InterruptGate<P> {
    pub fn new(platform: P) -> Self {
        let mut vectors = Vec::with_capacity(VECTOR_COUNT);
        vectors.resize(VECTOR_COUNT, None);
        Self {
            platform,
            vectors: RwLock::new(vectors),
            in_external: AtomicBool::new(false),
            yield_on_return: AtomicBool::new(false),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    // ── Mask ────────────────────────────────────────────────────

    pub fn level(&self) -> IntrLevel {
        if self.platform.interrupts_enabled() {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    /// Set the level, returning the previous one.
    pub fn set_level(&self, level: IntrLevel) -> IntrLevel {
        match level {
            IntrLevel::On => self.unmask(),
            IntrLevel::Off => self.mask(),
        }
    }

    /// Disable interrupts, returning the previous level.
    pub fn mask(&self) -> IntrLevel {
        let old = self.level();
        self.platform.disable_interrupts();
        old
    }

    /// Enable interrupts, returning the previous level.
    ///
    /// External handlers must run to completion masked.
    pub fn unmask(&self) -> IntrLevel {
        assert!(
            !self.in_interrupt(),
            "interrupts unmasked inside an external interrupt handler"
        );
        let old = self.level();
        self.platform.enable_interrupts();
        old
    }

    /// Mask interrupts until the returned guard is dropped, then restore
    /// whatever level was active before.
    pub fn mask_scoped(&self) -> IntrGuard<'_, P> {
        IntrGuard {
            gate: self,
            previous: self.mask(),
        }
    }

    // ── Interrupt context ───────────────────────────────────────

    /// `true` while an external interrupt is being handled.
    pub fn in_interrupt(&self) -> bool {
        self.in_external.load(Ordering::Acquire)
    }

    /// Ask for the interrupted thread to yield once the current external
    /// handler has finished.
    pub fn yield_on_return(&self) {
        assert!(self.in_interrupt(), "yield_on_return outside an external interrupt");
        self.yield_on_return.store(true, Ordering::Release);
    }

    pub(crate) fn take_yield_on_return(&self) -> bool {
        self.yield_on_return.swap(false, Ordering::AcqRel)
    }

    // ── Registration ────────────────────────────────────────────

    /// Register a hardware interrupt handler. It runs with interrupts
    /// masked and is not callable from user mode.
    pub fn register_external<F>(&self, vector: u8, name: &'static str, handler: F)
    where
        F: Fn(&mut InterruptFrame) + Send + Sync + 'static,
    {
        assert!(
            EXTERNAL_VECTORS.contains(&vector),
            "vector {vector:#04x} is not an external interrupt"
        );
        self.register(vector, 0, IntrLevel::Off, name, Arc::new(handler));
    }

    /// Register an exception or software-interrupt handler.
    pub fn register_internal<F>(
        &self,
        vector: u8,
        dpl: u8,
        level: IntrLevel,
        name: &'static str,
        handler: F,
    ) where
        F: Fn(&mut InterruptFrame) + Send + Sync + 'static,
    {
        assert!(
            !EXTERNAL_VECTORS.contains(&vector),
            "vector {vector:#04x} is reserved for external interrupts"
        );
        assert!(dpl <= 3, "descriptor privilege level {dpl} out of range");
        self.register(vector, dpl, level, name, Arc::new(handler));
    }

    fn register(&self, vector: u8, dpl: u8, level: IntrLevel, name: &'static str, handler: Handler) {
        // Masked: `dispatch` must never find the table write-locked.
        let _guard = self.mask_scoped();
        let mut vectors = self.vectors.write();
        let slot = &mut vectors[vector as usize];
        if let Some(existing) = slot {
            panic!(
                "vector {:#04x} registered twice ({} and {})",
                vector, existing.name, name
            );
        }
        *slot = Some(VectorEntry {
            handler,
            dpl,
            level,
            name,
        });
        drop(vectors);

        self.platform.install_gate(vector, dpl, level);
        log::debug!("interrupt {:#04x} -> {} (dpl {}, {:?})", vector, name, dpl, level);
    }

    /// Registration of `vector`, if it has a handler.
    pub fn handler_info(&self, vector: u8) -> Option<VectorInfo> {
        self.vectors.read()[vector as usize]
            .as_ref()
            .map(|e| VectorInfo {
                name: e.name,
                dpl: e.dpl,
                level: e.level,
            })
    }

    /// Name a handler was registered under, if any.
    pub fn handler_name(&self, vector: u8) -> Option<&'static str> {
        self.handler_info(vector).map(|info| info.name)
    }

    // ── Dispatch ────────────────────────────────────────────────

    /// Run the handler for `frame`'s vector.
    ///
    /// Called by the architecture's common entry stub with interrupts
    /// masked. External interrupts are acknowledged before returning; any
    /// requested yield is left for the caller to act on.
    pub fn dispatch(&self, frame: &mut InterruptFrame) {
        let vector = frame.vector();
        let external = EXTERNAL_VECTORS.contains(&vector);

        if external {
            assert_eq!(self.level(), IntrLevel::Off, "external interrupt entered unmasked");
            assert!(!self.in_interrupt(), "nested external interrupt {vector:#04x}");
            self.in_external.store(true, Ordering::Release);
            self.yield_on_return.store(false, Ordering::Release);
        }

        // Clone the entry out so no lock is held while the handler runs.
        let entry = self.vectors.read()[vector as usize].clone();
        match entry {
            Some(entry) => {
                let trap = !external && entry.level == IntrLevel::On;
                if trap {
                    self.platform.enable_interrupts();
                }
                (entry.handler)(frame);
                if trap {
                    self.platform.disable_interrupts();
                }
            }
            None if SPURIOUS_VECTORS.contains(&vector) => {}
            None => self.unexpected(frame),
        }

        if external {
            assert_eq!(self.level(), IntrLevel::Off, "external handler unmasked interrupts");
            self.in_external.store(false, Ordering::Release);
            self.platform.end_of_interrupt(vector);
        }
    }

    fn unexpected(&self, frame: &InterruptFrame) -> ! {
        log::error!("unexpected interrupt");
        log::error!("{}", frame);
        panic!(
            "unexpected interrupt {:#04x} ({})",
            frame.vec_no,
            vector_name(frame.vector())
        );
    }
}

// ── Scoped mask ─────────────────────────────────────────────────

/// Restores the saved interrupt level when dropped.
pub struct IntrGuard<'a, P: Platform> {
    gate: &'a InterruptGate<P>,
    previous: IntrLevel,
}

impl<P: Platform> IntrGuard<'_, P> {
    /// Level that will be restored.
    pub fn previous(&self) -> IntrLevel {
        self.previous
    }
}

impl<P: Platform> Drop for IntrGuard<'_, P> {
    fn drop(&mut self) {
        self.gate.set_level(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimPlatform;
    use core::sync::atomic::AtomicUsize;

    fn gate() -> InterruptGate<SimPlatform> {
        InterruptGate::new(SimPlatform::new())
    }

    #[test]
    fn mask_returns_previous_level() {
        let gate = gate();
        assert_eq!(gate.level(), IntrLevel::Off);
        assert_eq!(gate.unmask(), IntrLevel::Off);
        assert_eq!(gate.mask(), IntrLevel::On);
        assert_eq!(gate.set_level(IntrLevel::Off), IntrLevel::Off);
        assert_eq!(gate.level(), IntrLevel::Off);
    }

    #[test]
    fn scoped_mask_restores_prior_level() {
        let gate = gate();
        gate.unmask();
        {
            let guard = gate.mask_scoped();
            assert_eq!(guard.previous(), IntrLevel::On);
            assert_eq!(gate.level(), IntrLevel::Off);
            {
                let _inner = gate.mask_scoped();
            }
            assert_eq!(gate.level(), IntrLevel::Off);
        }
        assert_eq!(gate.level(), IntrLevel::On);
    }

    #[test]
    fn external_handler_runs_masked_and_is_acknowledged() {
        let gate = Arc::new(gate());
        let seen = Arc::new(AtomicUsize::new(0));
        let (g, s) = (gate.clone(), seen.clone());
        gate.register_external(0x21, "keyboard", move |frame| {
            assert!(g.in_interrupt());
            assert_eq!(g.level(), IntrLevel::Off);
            assert_eq!(frame.vector(), 0x21);
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(gate.handler_name(0x21), Some("keyboard"));
        assert_eq!(gate.platform().gate(0x21), Some((0, IntrLevel::Off)));

        gate.dispatch(&mut InterruptFrame::new(0x21));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!gate.in_interrupt());
        assert_eq!(gate.platform().acknowledged(), vec![0x21]);
    }

    #[test]
    fn trap_gate_handler_runs_unmasked() {
        let gate = Arc::new(gate());
        let g = gate.clone();
        gate.register_internal(0x30, 3, IntrLevel::On, "syscall", move |_| {
            assert!(!g.in_interrupt());
            assert_eq!(g.level(), IntrLevel::On);
        });
        assert_eq!(gate.platform().gate(0x30), Some((3, IntrLevel::On)));
        assert_eq!(
            gate.handler_info(0x30),
            Some(VectorInfo {
                name: "syscall",
                dpl: 3,
                level: IntrLevel::On
            })
        );
        assert_eq!(gate.handler_info(0x31), None);

        gate.dispatch(&mut InterruptFrame::new(0x30));
        assert_eq!(gate.level(), IntrLevel::Off);
        assert!(gate.platform().acknowledged().is_empty());
    }

    #[test]
    fn spurious_vectors_are_ignored() {
        let gate = gate();
        gate.dispatch(&mut InterruptFrame::new(0x27));
        gate.dispatch(&mut InterruptFrame::new(0x2f));
        assert!(!gate.in_interrupt());
    }

    #[test]
    #[should_panic(expected = "unexpected interrupt 0x0d")]
    fn unregistered_vector_is_fatal() {
        let gate = gate();
        let mut frame = InterruptFrame::new(13);
        frame.error_code = 0x10;
        gate.dispatch(&mut frame);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn double_registration_is_fatal() {
        let gate = gate();
        gate.register_external(0x20, "timer", |_| {});
        gate.register_external(0x20, "timer again", |_| {});
    }

    #[test]
    #[should_panic(expected = "not an external interrupt")]
    fn external_registration_checks_range() {
        gate().register_external(0x80, "syscall", |_| {});
    }

    #[test]
    #[should_panic(expected = "inside an external interrupt handler")]
    fn unmask_inside_external_handler_is_fatal() {
        let gate = Arc::new(gate());
        let g = gate.clone();
        gate.register_external(0x22, "cascade", move |_| {
            g.unmask();
        });
        gate.dispatch(&mut InterruptFrame::new(0x22));
    }

    #[test]
    fn frame_dump_names_the_vector() {
        let mut frame = InterruptFrame::new(14);
        frame.rip = 0xdead_beef;
        let dump = format!("{frame}");
        assert!(dump.starts_with("Interrupt 0x0e (#PF Page-Fault Exception)"));
        assert!(dump.contains("rip=0x00000000deadbeef"));
        assert_eq!(vector_name(0x20), "8254 Timer");
        assert_eq!(vector_name(0x90), "unknown");
    }
}
